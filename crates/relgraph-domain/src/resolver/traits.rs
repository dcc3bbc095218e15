//! Traits for storage operations needed by the resolver.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DomainResult;
use crate::model::{ObjectRef, TypeSystem, UserRef};

use super::types::{ConsistencyPreference, StoredTupleRef};

/// One page request for a resolver scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: u32,
    pub continuation_token: Option<String>,
}

impl PageRequest {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            continuation_token: None,
        }
    }

    /// The request for the page after `token`.
    pub fn next(&self, token: String) -> Self {
        Self {
            page_size: self.page_size,
            continuation_token: Some(token),
        }
    }
}

/// One page of a resolver scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuplePage<T> {
    pub items: Vec<T>,
    /// Present while more pages remain.
    pub continuation_token: Option<String>,
}

/// Tuple reads needed by the resolver.
#[async_trait]
pub trait TupleReader: Send + Sync {
    /// Point read of one exact tuple.
    async fn read_user_tuple(
        &self,
        store_id: &str,
        object: &ObjectRef,
        relation: &str,
        user: &UserRef,
    ) -> DomainResult<Option<StoredTupleRef>>;

    /// Every user written on `object#relation`, one page at a time.
    async fn read_object_tuples(
        &self,
        store_id: &str,
        object: &ObjectRef,
        relation: &str,
        page: &PageRequest,
    ) -> DomainResult<TuplePage<StoredTupleRef>>;

    /// Only the userset users of `object#relation`. A page may come back
    /// empty while its continuation token is still set.
    async fn read_userset_tuples(
        &self,
        store_id: &str,
        object: &ObjectRef,
        relation: &str,
        page: &PageRequest,
    ) -> DomainResult<TuplePage<StoredTupleRef>> {
        let mut result = self
            .read_object_tuples(store_id, object, relation, page)
            .await?;
        result.items.retain(|t| t.user_relation.is_some());
        Ok(result)
    }

    /// Reverse scan: ids of objects of `object_type` with a tuple
    /// `(object, relation, user)`.
    async fn read_starting_with_user(
        &self,
        store_id: &str,
        object_type: &str,
        relation: &str,
        user: &UserRef,
        page: &PageRequest,
    ) -> DomainResult<TuplePage<String>>;
}

/// Model lookups needed by the resolver.
#[async_trait]
pub trait ModelReader: Send + Sync {
    /// Loads a validated model. `None` means the store's latest model.
    async fn get_model(
        &self,
        store_id: &str,
        model_id: Option<&str>,
        consistency: ConsistencyPreference,
    ) -> DomainResult<Arc<TypeSystem>>;
}
