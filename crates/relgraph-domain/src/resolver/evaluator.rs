//! Boolean combinators for concurrently evaluated branches.
//!
//! Branches are polled with bounded concurrency. Once the answer is known
//! the remaining branches are dropped, which cancels their reads.

use std::future::Future;
use std::pin::Pin;

use futures::stream::{self, FuturesUnordered, StreamExt};

use crate::error::{DomainError, DomainResult};

/// Type alias for boxed future to handle async recursion.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Union: true as soon as any branch is true.
///
/// When no branch is true the first error wins over `false`.
pub(crate) async fn any<'a>(
    branches: Vec<BoxFuture<'a, DomainResult<bool>>>,
    breadth: usize,
) -> DomainResult<bool> {
    let mut results = stream::iter(branches).buffer_unordered(breadth.max(1));
    let mut first_error = None;
    while let Some(result) = results.next().await {
        match result {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(false), Err)
}

/// Intersection: false as soon as any branch is false. No branches is false.
///
/// When no branch is false the first error wins over `true`.
pub(crate) async fn all<'a>(
    branches: Vec<BoxFuture<'a, DomainResult<bool>>>,
    breadth: usize,
) -> DomainResult<bool> {
    if branches.is_empty() {
        return Ok(false);
    }
    let mut results = stream::iter(branches).buffer_unordered(breadth.max(1));
    let mut first_error = None;
    while let Some(result) = results.next().await {
        match result {
            Ok(false) => return Ok(false),
            Ok(true) => {}
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(true), Err)
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Base,
    Subtract,
}

/// Exclusion: base and subtract race; false as soon as base is false or
/// subtract is true.
pub(crate) async fn but_not<'a>(
    base: BoxFuture<'a, DomainResult<bool>>,
    subtract: BoxFuture<'a, DomainResult<bool>>,
) -> DomainResult<bool> {
    let mut pending: FuturesUnordered<BoxFuture<'a, (Side, DomainResult<bool>)>> =
        FuturesUnordered::new();
    pending.push(Box::pin(async move { (Side::Base, base.await) }));
    pending.push(Box::pin(async move { (Side::Subtract, subtract.await) }));

    let mut base_result = None;
    let mut subtract_result = None;
    while let Some((side, result)) = pending.next().await {
        match (side, result) {
            (Side::Base, Ok(false)) | (Side::Subtract, Ok(true)) => return Ok(false),
            (Side::Base, result) => base_result = Some(result),
            (Side::Subtract, result) => subtract_result = Some(result),
        }
    }

    match (base_result, subtract_result) {
        (Some(Ok(true)), Some(Ok(false))) => Ok(true),
        (Some(Err(e)), _) | (_, Some(Err(e))) => Err(e),
        _ => Err(DomainError::Internal {
            message: "exclusion finished without both operands".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn ready(value: DomainResult<bool>) -> BoxFuture<'static, DomainResult<bool>> {
        Box::pin(async move { value })
    }

    fn never() -> BoxFuture<'static, DomainResult<bool>> {
        Box::pin(futures::future::pending())
    }

    fn boom() -> DomainResult<bool> {
        Err(DomainError::Storage {
            message: "boom".to_string(),
        })
    }

    #[tokio::test]
    async fn test_any_short_circuits_on_true() {
        assert_eq!(any(vec![never(), ready(Ok(true))], 10).await, Ok(true));
        assert_eq!(any(vec![ready(boom()), ready(Ok(true))], 10).await, Ok(true));
    }

    #[tokio::test]
    async fn test_any_prefers_error_over_false() {
        assert_eq!(any(vec![ready(Ok(false)), ready(boom())], 10).await, boom());
        assert_eq!(any(vec![ready(Ok(false))], 10).await, Ok(false));
        assert_eq!(any(vec![], 10).await, Ok(false));
    }

    #[tokio::test]
    async fn test_all_short_circuits_on_false() {
        assert_eq!(all(vec![never(), ready(Ok(false))], 10).await, Ok(false));
        assert_eq!(all(vec![ready(boom()), ready(Ok(false))], 10).await, Ok(false));
        assert_eq!(all(vec![ready(Ok(true)), ready(boom())], 10).await, boom());
        assert_eq!(all(vec![ready(Ok(true)), ready(Ok(true))], 10).await, Ok(true));
        assert_eq!(all(vec![], 10).await, Ok(false));
    }

    #[tokio::test]
    async fn test_but_not_truth_table() {
        assert_eq!(but_not(ready(Ok(true)), ready(Ok(false))).await, Ok(true));
        assert_eq!(but_not(ready(Ok(true)), ready(Ok(true))).await, Ok(false));
        assert_eq!(but_not(ready(Ok(false)), ready(Ok(false))).await, Ok(false));
        assert_eq!(but_not(ready(Ok(false)), never()).await, Ok(false));
        assert_eq!(but_not(never(), ready(Ok(true))).await, Ok(false));
        assert_eq!(but_not(ready(boom()), ready(Ok(true))).await, Ok(false));
        assert_eq!(but_not(ready(Ok(true)), ready(boom())).await, boom());
    }

    #[tokio::test]
    async fn test_breadth_of_one_still_completes() {
        let slow: BoxFuture<'static, DomainResult<bool>> = Box::pin(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(false)
        });
        assert_eq!(any(vec![slow, ready(Ok(true))], 1).await, Ok(true));
    }
}
