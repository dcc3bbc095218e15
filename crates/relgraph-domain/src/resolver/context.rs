//! Per-query resolution context.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{DomainError, DomainResult};
use crate::model::TypeSystem;

use super::config::ResolverConfig;

/// Dispatch counter shared by every branch of one query.
#[derive(Debug)]
pub(crate) struct ResolutionBudget {
    dispatched: AtomicU32,
    limit: u32,
}

impl ResolutionBudget {
    fn new(limit: u32) -> Self {
        Self {
            dispatched: AtomicU32::new(0),
            limit,
        }
    }
}

/// State threaded through one query's call tree.
///
/// Cloning is cheap. The visited set is copy-on-write along each path, so
/// sibling branches never observe each other's entries.
#[derive(Debug, Clone)]
pub(crate) struct ResolutionContext {
    pub(crate) store_id: Arc<str>,
    /// Model version pinned for the whole query.
    pub(crate) model: Arc<TypeSystem>,
    pub(crate) depth: u32,
    max_depth: u32,
    /// `object#relation` keys on the current path.
    visited: Arc<HashSet<String>>,
    budget: Arc<ResolutionBudget>,
    limiter: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl ResolutionContext {
    pub(crate) fn new(
        store_id: &str,
        model: Arc<TypeSystem>,
        config: &ResolverConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store_id: Arc::from(store_id),
            model,
            depth: 0,
            max_depth: config.max_depth,
            visited: Arc::new(HashSet::new()),
            budget: Arc::new(ResolutionBudget::new(config.max_dispatches)),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_reads.max(1))),
            cancel,
        }
    }

    /// One level deeper, charged against the dispatch budget.
    pub(crate) fn descend(&self) -> DomainResult<Self> {
        self.ensure_active()?;
        if self.depth >= self.max_depth {
            return Err(DomainError::DepthLimitExceeded {
                max_depth: self.max_depth,
            });
        }
        self.charge()?;
        Ok(Self {
            depth: self.depth + 1,
            ..self.clone()
        })
    }

    /// Adds `key` to the path, or `None` when it is already on it.
    pub(crate) fn with_visited(&self, key: &str) -> Option<Self> {
        if self.visited.contains(key) {
            return None;
        }
        let mut visited = (*self.visited).clone();
        visited.insert(key.to_string());
        Some(Self {
            visited: Arc::new(visited),
            ..self.clone()
        })
    }

    pub(crate) fn charge(&self) -> DomainResult<()> {
        let dispatched = self.budget.dispatched.fetch_add(1, Ordering::Relaxed) + 1;
        if dispatched > self.budget.limit {
            return Err(DomainError::ResolutionBudgetExceeded {
                limit: self.budget.limit,
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_active(&self) -> DomainResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        Ok(())
    }

    /// Runs one datastore read under the query's read limiter, racing it
    /// against cancellation. The permit is released when the read ends.
    pub(crate) async fn read<T, F>(&self, read: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DomainError::Cancelled),
            result = async {
                let _permit = self.limiter.acquire().await.map_err(|_| DomainError::Internal {
                    message: "read limiter closed".to_string(),
                })?;
                read.await
            } => result,
        }
    }

    /// A root-level context for an independent sub-query on the same model,
    /// with its own path, depth and budget. Reads and cancellation stay
    /// shared with the parent query.
    pub(crate) fn fresh_branch(&self) -> Self {
        Self {
            depth: 0,
            visited: Arc::new(HashSet::new()),
            budget: Arc::new(ResolutionBudget::new(self.budget.limit)),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse;

    fn context(config: &ResolverConfig) -> ResolutionContext {
        let model = TypeSystem::new(parse("type user").unwrap()).unwrap();
        ResolutionContext::new("store", Arc::new(model), config, CancellationToken::new())
    }

    #[test]
    fn test_visited_is_copy_on_write() {
        let root = context(&ResolverConfig::default());
        let a = root.with_visited("doc:1#viewer").unwrap();
        assert!(a.with_visited("doc:1#viewer").is_none());
        assert!(root.with_visited("doc:1#viewer").is_some());
    }

    #[test]
    fn test_descend_stops_at_max_depth() {
        let mut ctx = context(&ResolverConfig::default().with_max_depth(2));
        ctx = ctx.descend().unwrap();
        ctx = ctx.descend().unwrap();
        assert_eq!(
            ctx.descend().unwrap_err(),
            DomainError::DepthLimitExceeded { max_depth: 2 }
        );
    }

    #[test]
    fn test_budget_is_shared_across_clones() {
        let ctx = context(&ResolverConfig::default().with_max_dispatches(2));
        let sibling = ctx.clone();
        ctx.charge().unwrap();
        sibling.charge().unwrap();
        assert_eq!(
            ctx.charge().unwrap_err(),
            DomainError::ResolutionBudgetExceeded { limit: 2 }
        );
        assert!(ctx.fresh_branch().charge().is_ok());
    }

    #[tokio::test]
    async fn test_read_observes_cancellation() {
        let cancel = CancellationToken::new();
        let model = TypeSystem::new(parse("type user").unwrap()).unwrap();
        let ctx = ResolutionContext::new(
            "store",
            Arc::new(model),
            &ResolverConfig::default(),
            cancel.clone(),
        );
        cancel.cancel();
        let result = ctx
            .read(futures::future::pending::<DomainResult<()>>())
            .await;
        assert_eq!(result, Err(DomainError::Cancelled));
        assert_eq!(ctx.ensure_active(), Err(DomainError::Cancelled));
    }
}
