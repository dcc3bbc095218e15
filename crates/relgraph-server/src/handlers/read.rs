//! Paginated tuple reads and the change feed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use relgraph_domain::error::{DomainError, DomainResult};
use relgraph_domain::model::TupleKey;
use relgraph_storage::traits::DEFAULT_PAGE_SIZE;
use relgraph_storage::{DataStore, PaginationOptions, TupleFilter, TupleOperation};

use crate::adapters::{storage_error, tuple_key};

/// Largest page a caller may ask for.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Resolves a requested page size: 1..=100, 50 when absent.
pub fn page_size(requested: Option<u32>) -> DomainResult<u32> {
    match requested {
        None => Ok(DEFAULT_PAGE_SIZE),
        Some(size) if (1..=MAX_PAGE_SIZE).contains(&size) => Ok(size),
        Some(size) => Err(DomainError::InvalidParameter {
            parameter: "page_size".to_string(),
            reason: format!("must be between 1 and {MAX_PAGE_SIZE}, got {size}"),
        }),
    }
}

/// Which tuples a Read returns. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    /// `type:id`, or `type:` for every object of a type.
    pub object: Option<String>,
    pub relation: Option<String>,
    pub user: Option<String>,
}

impl ReadFilter {
    fn to_tuple_filter(&self) -> DomainResult<TupleFilter> {
        let (object_type, object_id) = match self.object.as_deref() {
            None => (None, None),
            Some(object) => {
                let (object_type, object_id) =
                    object
                        .split_once(':')
                        .ok_or_else(|| DomainError::InvalidObjectFormat {
                            value: object.to_string(),
                        })?;
                if object_type.is_empty() {
                    return Err(DomainError::InvalidObjectFormat {
                        value: object.to_string(),
                    });
                }
                let object_id = (!object_id.is_empty()).then(|| object_id.to_string());
                (Some(object_type.to_string()), object_id)
            }
        };
        Ok(TupleFilter {
            object_type,
            object_id,
            relation: self.relation.clone(),
            user: self.user.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TuplePage {
    pub tuples: Vec<TupleKey>,
    pub continuation_token: Option<String>,
}

/// One change feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleChangeEntry {
    pub tuple_key: TupleKey,
    pub operation: TupleOperation,
    pub timestamp: DateTime<Utc>,
}

/// One page of the change feed. The token is always set, so a caller can
/// poll with it for changes committed later.
#[derive(Debug, Clone)]
pub struct ChangePage {
    pub changes: Vec<TupleChangeEntry>,
    pub continuation_token: Option<String>,
}

pub struct ReadHandler<S: DataStore> {
    storage: Arc<S>,
}

impl<S: DataStore> ReadHandler<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    #[instrument(skip(self, continuation_token))]
    pub async fn read(
        &self,
        store_id: &str,
        filter: &ReadFilter,
        page_size_hint: Option<u32>,
        continuation_token: Option<String>,
    ) -> DomainResult<TuplePage> {
        let pagination =
            PaginationOptions::new(page_size(page_size_hint)?).with_token(continuation_token);
        let page = self
            .storage
            .read_tuples_paginated(store_id, &filter.to_tuple_filter()?, &pagination)
            .await
            .map_err(|e| storage_error(store_id, e))?;
        Ok(TuplePage {
            tuples: page.items.iter().map(tuple_key).collect(),
            continuation_token: page.continuation_token,
        })
    }

    #[instrument(skip(self, continuation_token))]
    pub async fn read_changes(
        &self,
        store_id: &str,
        object_type: Option<&str>,
        page_size_hint: Option<u32>,
        continuation_token: Option<String>,
    ) -> DomainResult<ChangePage> {
        let pagination =
            PaginationOptions::new(page_size(page_size_hint)?).with_token(continuation_token);
        let page = self
            .storage
            .read_changes(store_id, object_type, &pagination)
            .await
            .map_err(|e| storage_error(store_id, e))?;
        Ok(ChangePage {
            changes: page
                .items
                .iter()
                .map(|change| TupleChangeEntry {
                    tuple_key: tuple_key(&change.tuple),
                    operation: change.operation,
                    timestamp: change.timestamp,
                })
                .collect(),
            continuation_token: page.continuation_token,
        })
    }
}
