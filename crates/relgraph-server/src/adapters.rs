//! Adapters that bridge the storage layer to the domain layer.
//!
//! The domain layer (relgraph-domain) defines the traits the resolvers read
//! through:
//! - `TupleReader`: point reads, forward scans and reverse scans of tuples
//! - `ModelReader`: validated authorization models
//!
//! This module implements both over any `DataStore` and maps storage errors
//! onto domain errors at that boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{debug, instrument};

use relgraph_domain::error::{DomainError, DomainResult};
use relgraph_domain::model::{AuthorizationModel, ObjectRef, TupleKey, TypeSystem, UserRef};
use relgraph_domain::resolver::{
    ConsistencyPreference, ModelReader, PageRequest, StoredTupleRef, TuplePage, TupleReader,
};
use relgraph_storage::{
    DataStore, PaginationOptions, StorageError, StoredAuthorizationModel, StoredTuple,
    TupleFilter,
};

use crate::config::ModelCacheSettings;

/// Maps a storage failure onto the domain error callers see.
pub fn storage_error(store_id: &str, err: StorageError) -> DomainError {
    match err {
        StorageError::StoreNotFound { store_id } => DomainError::StoreNotFound { store_id },
        StorageError::ModelNotFound { model_id } => DomainError::AuthorizationModelNotFound {
            store_id: store_id.to_string(),
            model_id,
        },
        e @ (StorageError::DuplicateTuple { .. } | StorageError::TupleNotFound { .. }) => {
            DomainError::WriteConflict {
                reason: e.to_string(),
            }
        }
        StorageError::InvalidContinuationToken { reason } => {
            DomainError::InvalidContinuationToken { reason }
        }
        StorageError::InvalidInput { message } | StorageError::InvalidFilter { message } => {
            DomainError::InvalidParameter {
                parameter: "request".to_string(),
                reason: message,
            }
        }
        e => DomainError::Storage {
            message: e.to_string(),
        },
    }
}

/// The stored form of a validated tuple.
pub fn stored_tuple(object: &ObjectRef, relation: &str, user: &UserRef) -> StoredTuple {
    StoredTuple::new(
        &object.object_type,
        &object.object_id,
        relation,
        user.user_type(),
        user.user_id(),
        user.relation().map(str::to_string),
    )
}

/// The caller-facing form of a stored tuple.
pub fn tuple_key(tuple: &StoredTuple) -> TupleKey {
    TupleKey::new(tuple.object(), &tuple.relation, tuple.user())
}

fn tuple_ref(tuple: StoredTuple) -> StoredTupleRef {
    StoredTupleRef::new(tuple.user_type, tuple.user_id, tuple.user_relation)
}

fn pagination(page: &PageRequest) -> PaginationOptions {
    PaginationOptions::new(page.page_size).with_token(page.continuation_token.clone())
}

/// Adapter that implements `TupleReader` using a `DataStore`.
pub struct DataStoreTupleReader<S: DataStore> {
    storage: Arc<S>,
}

impl<S: DataStore> DataStoreTupleReader<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: DataStore> TupleReader for DataStoreTupleReader<S> {
    async fn read_user_tuple(
        &self,
        store_id: &str,
        object: &ObjectRef,
        relation: &str,
        user: &UserRef,
    ) -> DomainResult<Option<StoredTupleRef>> {
        let found = self
            .storage
            .read_tuple(store_id, &stored_tuple(object, relation, user))
            .await
            .map_err(|e| storage_error(store_id, e))?;
        Ok(found.map(tuple_ref))
    }

    async fn read_object_tuples(
        &self,
        store_id: &str,
        object: &ObjectRef,
        relation: &str,
        page: &PageRequest,
    ) -> DomainResult<TuplePage<StoredTupleRef>> {
        let filter = TupleFilter::for_object(&object.object_type, &object.object_id, relation);
        let result = self
            .storage
            .read_tuples_paginated(store_id, &filter, &pagination(page))
            .await
            .map_err(|e| storage_error(store_id, e))?;
        Ok(TuplePage {
            items: result.items.into_iter().map(tuple_ref).collect(),
            continuation_token: result.continuation_token,
        })
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        object_type: &str,
        relation: &str,
        user: &UserRef,
        page: &PageRequest,
    ) -> DomainResult<TuplePage<String>> {
        let filter = TupleFilter::for_user(object_type, relation, &user.to_string());
        let result = self
            .storage
            .read_tuples_paginated(store_id, &filter, &pagination(page))
            .await
            .map_err(|e| storage_error(store_id, e))?;
        Ok(TuplePage {
            items: result.items.into_iter().map(|t| t.object_id).collect(),
            continuation_token: result.continuation_token,
        })
    }
}

/// Validated models keyed by `(store, model id)`, plus a short-lived
/// "latest model id" pointer per store.
///
/// Model versions are immutable once written, so only the latest pointer
/// can go stale; it expires after `latest_ttl_ms` and is dropped whenever
/// the store gets a new model. Deleting a store drops all of its entries.
pub struct ModelIndex<S: DataStore> {
    storage: Arc<S>,
    models: Cache<(String, String), Arc<TypeSystem>>,
    latest: Cache<String, String>,
}

impl<S: DataStore> ModelIndex<S> {
    pub fn new(storage: Arc<S>, settings: &ModelCacheSettings) -> Self {
        Self {
            storage,
            models: Cache::builder()
                .max_capacity(settings.max_capacity)
                .support_invalidation_closures()
                .build(),
            latest: Cache::builder()
                .time_to_live(Duration::from_millis(settings.latest_ttl_ms))
                .build(),
        }
    }

    /// Validates a model document, reporting every structural problem.
    pub fn validate(model: AuthorizationModel) -> DomainResult<TypeSystem> {
        TypeSystem::new(model)
    }

    /// Decodes and validates a stored model version.
    pub fn decode(stored: &StoredAuthorizationModel) -> DomainResult<TypeSystem> {
        let model: AuthorizationModel =
            serde_json::from_str(&stored.model_json).map_err(|e| DomainError::Internal {
                message: format!("stored model {} is not readable: {e}", stored.id),
            })?;
        TypeSystem::new(model.with_id(&stored.id))
    }

    /// Forgets the cached latest model id of a store.
    pub async fn invalidate_latest(&self, store_id: &str) {
        self.latest.invalidate(store_id).await;
    }

    /// Forgets every cached model of a deleted store.
    pub async fn invalidate_store(&self, store_id: &str) -> DomainResult<()> {
        self.latest.invalidate(store_id).await;
        let store_id = store_id.to_string();
        self.models
            .invalidate_entries_if(move |(store, _), _| *store == store_id)
            .map(|_| ())
            .map_err(|e| DomainError::Internal {
                message: format!("failed to invalidate cached models: {e}"),
            })
    }

    async fn fetch_latest_id(&self, store_id: &str) -> DomainResult<String> {
        let stored = self
            .storage
            .get_latest_authorization_model(store_id)
            .await
            .map_err(|e| storage_error(store_id, e))?;
        Ok(stored.id)
    }

    async fn latest_model_id(
        &self,
        store_id: &str,
        consistency: ConsistencyPreference,
    ) -> DomainResult<String> {
        if consistency == ConsistencyPreference::HigherConsistency {
            let id = self.fetch_latest_id(store_id).await?;
            self.latest.insert(store_id.to_string(), id.clone()).await;
            return Ok(id);
        }
        self.latest
            .try_get_with(store_id.to_string(), self.fetch_latest_id(store_id))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn load(&self, store_id: &str, model_id: &str) -> DomainResult<Arc<TypeSystem>> {
        let stored = self
            .storage
            .get_authorization_model(store_id, model_id)
            .await
            .map_err(|e| storage_error(store_id, e))?;
        debug!(store_id, model_id, "loaded authorization model");
        Ok(Arc::new(Self::decode(&stored)?))
    }
}

#[async_trait]
impl<S: DataStore> ModelReader for ModelIndex<S> {
    #[instrument(skip(self))]
    async fn get_model(
        &self,
        store_id: &str,
        model_id: Option<&str>,
        consistency: ConsistencyPreference,
    ) -> DomainResult<Arc<TypeSystem>> {
        let model_id = match model_id {
            Some(id) => id.to_string(),
            None => self.latest_model_id(store_id, consistency).await?,
        };
        self.models
            .try_get_with(
                (store_id.to_string(), model_id.clone()),
                self.load(store_id, &model_id),
            )
            .await
            .map_err(|e| (*e).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relgraph_domain::model::parse;
    use relgraph_storage::MemoryDataStore;

    const STORE: &str = "01HSTORE";

    const MODEL: &str = r#"
type user
type document
  relations
    define viewer: [user, user:*]
"#;

    fn stored_model(id: &str, dsl: &str) -> StoredAuthorizationModel {
        let model = parse(dsl).unwrap();
        StoredAuthorizationModel {
            id: id.to_string(),
            store_id: STORE.to_string(),
            schema_version: model.schema_version.clone(),
            model_json: serde_json::to_string(&model).unwrap(),
            created_at: Utc::now(),
        }
    }

    async fn storage() -> Arc<MemoryDataStore> {
        let storage = MemoryDataStore::new_shared();
        storage.create_store(STORE, "test").await.unwrap();
        storage
    }

    #[test]
    fn test_storage_errors_map_to_stable_codes() {
        use relgraph_domain::ErrorCode;

        let cases = [
            (
                StorageError::StoreNotFound {
                    store_id: "s".to_string(),
                },
                ErrorCode::NotFound,
            ),
            (
                StorageError::ModelNotFound {
                    model_id: "m".to_string(),
                },
                ErrorCode::NotFound,
            ),
            (
                StorageError::DuplicateTuple {
                    object_type: "document".to_string(),
                    object_id: "1".to_string(),
                    relation: "viewer".to_string(),
                    user: "user:anne".to_string(),
                },
                ErrorCode::ConditionalWriteError,
            ),
            (
                StorageError::InvalidContinuationToken {
                    reason: "bad".to_string(),
                },
                ErrorCode::InvalidContinuationToken,
            ),
            (
                StorageError::InvalidFilter {
                    message: "bad".to_string(),
                },
                ErrorCode::ValidationError,
            ),
            (
                StorageError::QueryError {
                    message: "io".to_string(),
                },
                ErrorCode::Internal,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(storage_error(STORE, err).code(), code);
        }
    }

    #[tokio::test]
    async fn test_tuple_reader_reads_through_storage() {
        let storage = storage().await;
        storage
            .write_tuples(
                STORE,
                vec![
                    StoredTuple::new("document", "1", "viewer", "user", "anne", None),
                    StoredTuple::new("document", "2", "viewer", "user", "*", None),
                    StoredTuple::new("document", "2", "viewer", "group", "eng", Some("member".into())),
                ],
                vec![],
            )
            .await
            .unwrap();
        let reader = DataStoreTupleReader::new(storage);

        let found = reader
            .read_user_tuple(STORE, &ObjectRef::new("document", "1"), "viewer", &UserRef::object("user", "anne"))
            .await
            .unwrap();
        assert_eq!(found, Some(StoredTupleRef::new("user", "anne", None)));

        let page = reader
            .read_object_tuples(STORE, &ObjectRef::new("document", "2"), "viewer", &PageRequest::new(1))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        let token = page.continuation_token.clone().unwrap();
        let rest = reader
            .read_object_tuples(
                STORE,
                &ObjectRef::new("document", "2"),
                "viewer",
                &PageRequest::new(1).next(token),
            )
            .await
            .unwrap();
        assert_eq!(rest.items.len(), 1);
        assert!(rest.continuation_token.is_none());

        let public = reader
            .read_starting_with_user(STORE, "document", "viewer", &UserRef::wildcard("user"), &PageRequest::new(10))
            .await
            .unwrap();
        assert_eq!(public.items, vec!["2".to_string()]);

        let err = reader
            .read_user_tuple("missing", &ObjectRef::new("document", "1"), "viewer", &UserRef::object("user", "anne"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::StoreNotFound { .. }));
    }

    #[tokio::test]
    async fn test_model_index_caches_the_latest_pointer() {
        let storage = storage().await;
        storage
            .write_authorization_model(stored_model("m1", MODEL))
            .await
            .unwrap();
        let index = ModelIndex::new(
            Arc::clone(&storage),
            &ModelCacheSettings {
                max_capacity: 10,
                latest_ttl_ms: 60_000,
            },
        );

        let latest = index
            .get_model(STORE, None, ConsistencyPreference::MinimizeLatency)
            .await
            .unwrap();
        assert_eq!(latest.id(), Some("m1"));

        storage
            .write_authorization_model(stored_model("m2", MODEL))
            .await
            .unwrap();

        // Still served from the cached pointer.
        let cached = index
            .get_model(STORE, None, ConsistencyPreference::MinimizeLatency)
            .await
            .unwrap();
        assert_eq!(cached.id(), Some("m1"));

        let fresh = index
            .get_model(STORE, None, ConsistencyPreference::HigherConsistency)
            .await
            .unwrap();
        assert_eq!(fresh.id(), Some("m2"));

        storage
            .write_authorization_model(stored_model("m3", MODEL))
            .await
            .unwrap();
        index.invalidate_latest(STORE).await;
        let invalidated = index
            .get_model(STORE, None, ConsistencyPreference::MinimizeLatency)
            .await
            .unwrap();
        assert_eq!(invalidated.id(), Some("m3"));

        let pinned = index
            .get_model(STORE, Some("m1"), ConsistencyPreference::MinimizeLatency)
            .await
            .unwrap();
        assert_eq!(pinned.id(), Some("m1"));
    }

    #[tokio::test]
    async fn test_model_index_not_found() {
        let storage = storage().await;
        let index = ModelIndex::new(storage, &ModelCacheSettings::default());

        let err = index
            .get_model(STORE, None, ConsistencyPreference::MinimizeLatency)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AuthorizationModelNotFound { .. }));

        let err = index
            .get_model(STORE, Some("nope"), ConsistencyPreference::MinimizeLatency)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AuthorizationModelNotFound { ref model_id, .. } if model_id == "nope"));

        let err = index
            .get_model("missing", None, ConsistencyPreference::MinimizeLatency)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::StoreNotFound { .. }));
    }

    #[tokio::test]
    async fn test_deleted_store_drops_cached_models() {
        let storage = storage().await;
        storage
            .write_authorization_model(stored_model("m1", MODEL))
            .await
            .unwrap();
        let index = ModelIndex::new(Arc::clone(&storage), &ModelCacheSettings::default());
        index
            .get_model(STORE, None, ConsistencyPreference::MinimizeLatency)
            .await
            .unwrap();

        storage.delete_store(STORE).await.unwrap();
        index.invalidate_store(STORE).await.unwrap();

        let err = index
            .get_model(STORE, Some("m1"), ConsistencyPreference::MinimizeLatency)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::StoreNotFound { .. }));
        let err = index
            .get_model(STORE, None, ConsistencyPreference::MinimizeLatency)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::StoreNotFound { .. }));
    }
}
