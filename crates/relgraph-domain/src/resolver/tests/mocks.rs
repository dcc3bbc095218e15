//! Mock implementations for resolver testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{DomainError, DomainResult};
use crate::model::{parse, ObjectRef, TypeSystem, UserRef};
use crate::resolver::{
    ConsistencyPreference, GraphResolver, ModelReader, PageRequest, ResolverConfig,
    StoredTupleRef, TuplePage, TupleReader,
};

pub const STORE: &str = "store1";

#[derive(Debug, Clone)]
struct MockTuple {
    object: ObjectRef,
    relation: String,
    user: StoredTupleRef,
}

/// In-memory tuple reader with offset-token paging.
pub struct MockTupleReader {
    tuples: RwLock<HashMap<String, Vec<MockTuple>>>,
    page_size_cap: usize,
    delay: Option<Duration>,
    fail: bool,
    reads: AtomicUsize,
}

impl MockTupleReader {
    pub fn new() -> Self {
        Self {
            tuples: RwLock::new(HashMap::new()),
            page_size_cap: usize::MAX,
            delay: None,
            fail: false,
            reads: AtomicUsize::new(0),
        }
    }

    /// Pages never hold more than `cap` items, whatever the caller asks.
    pub fn with_page_size_cap(mut self, cap: usize) -> Self {
        self.page_size_cap = cap;
        self
    }

    /// Every read sleeps first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every read fails with a storage error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Adds `object#relation@user`, e.g. `("document:1", "viewer", "group:eng#member")`.
    pub async fn add(&self, store_id: &str, object: &str, relation: &str, user: &str) {
        let object = ObjectRef::parse(object).unwrap();
        let user = match UserRef::parse(user).unwrap() {
            UserRef::Object { user_type, user_id } => StoredTupleRef::new(user_type, user_id, None),
            UserRef::Wildcard { user_type } => StoredTupleRef::new(user_type, "*", None),
            UserRef::Userset {
                user_type,
                user_id,
                relation,
            } => StoredTupleRef::new(user_type, user_id, Some(relation)),
        };
        self.tuples
            .write()
            .await
            .entry(store_id.to_string())
            .or_default()
            .push(MockTuple {
                object,
                relation: relation.to_string(),
                user,
            });
    }

    async fn before_read(&self) -> DomainResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(DomainError::Storage {
                message: "mock storage failure".to_string(),
            });
        }
        Ok(())
    }

    fn paginate<I>(&self, items: Vec<I>, page: &PageRequest) -> DomainResult<TuplePage<I>> {
        let offset = match &page.continuation_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                DomainError::InvalidContinuationToken {
                    reason: token.clone(),
                }
            })?,
            None => 0,
        };
        let size = (page.page_size as usize).min(self.page_size_cap).max(1);
        let end = (offset + size).min(items.len());
        let continuation_token = (end < items.len()).then(|| end.to_string());
        Ok(TuplePage {
            items: items.into_iter().skip(offset).take(size).collect(),
            continuation_token,
        })
    }
}

#[async_trait]
impl TupleReader for MockTupleReader {
    async fn read_user_tuple(
        &self,
        store_id: &str,
        object: &ObjectRef,
        relation: &str,
        user: &UserRef,
    ) -> DomainResult<Option<StoredTupleRef>> {
        self.before_read().await?;
        let tuples = self.tuples.read().await;
        Ok(tuples.get(store_id).and_then(|tuples| {
            tuples
                .iter()
                .find(|t| {
                    t.object == *object && t.relation == relation && t.user.to_user_ref() == *user
                })
                .map(|t| t.user.clone())
        }))
    }

    async fn read_object_tuples(
        &self,
        store_id: &str,
        object: &ObjectRef,
        relation: &str,
        page: &PageRequest,
    ) -> DomainResult<TuplePage<StoredTupleRef>> {
        self.before_read().await?;
        let items: Vec<StoredTupleRef> = self
            .tuples
            .read()
            .await
            .get(store_id)
            .map(|tuples| {
                tuples
                    .iter()
                    .filter(|t| t.object == *object && t.relation == relation)
                    .map(|t| t.user.clone())
                    .collect()
            })
            .unwrap_or_default();
        self.paginate(items, page)
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        object_type: &str,
        relation: &str,
        user: &UserRef,
        page: &PageRequest,
    ) -> DomainResult<TuplePage<String>> {
        self.before_read().await?;
        let items: Vec<String> = self
            .tuples
            .read()
            .await
            .get(store_id)
            .map(|tuples| {
                tuples
                    .iter()
                    .filter(|t| {
                        t.object.object_type == object_type
                            && t.relation == relation
                            && t.user.to_user_ref() == *user
                    })
                    .map(|t| t.object.object_id.clone())
                    .collect()
            })
            .unwrap_or_default();
        self.paginate(items, page)
    }
}

/// Model reader serving models built from DSL text.
pub struct MockModelReader {
    models: RwLock<HashMap<String, Vec<Arc<TypeSystem>>>>,
}

impl MockModelReader {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Parses and indexes `dsl` as the store's newest model.
    pub async fn add_model(&self, store_id: &str, model_id: &str, dsl: &str) {
        let model = parse(dsl).unwrap().with_id(model_id);
        let model = TypeSystem::new(model).unwrap();
        self.models
            .write()
            .await
            .entry(store_id.to_string())
            .or_default()
            .push(Arc::new(model));
    }
}

#[async_trait]
impl ModelReader for MockModelReader {
    async fn get_model(
        &self,
        store_id: &str,
        model_id: Option<&str>,
        _consistency: ConsistencyPreference,
    ) -> DomainResult<Arc<TypeSystem>> {
        let models = self.models.read().await;
        let versions = models.get(store_id).ok_or_else(|| DomainError::StoreNotFound {
            store_id: store_id.to_string(),
        })?;
        let found = match model_id {
            Some(id) => versions.iter().find(|m| m.id() == Some(id)),
            None => versions.last(),
        };
        found
            .cloned()
            .ok_or_else(|| DomainError::AuthorizationModelNotFound {
                store_id: store_id.to_string(),
                model_id: model_id.unwrap_or("latest").to_string(),
            })
    }
}

pub type MockResolver = GraphResolver<MockTupleReader, MockModelReader>;

/// Resolver over `tuples` (`object`, `relation`, `user`) and one model.
pub async fn resolver_with(
    dsl: &str,
    tuples: &[(&str, &str, &str)],
    config: ResolverConfig,
) -> Arc<MockResolver> {
    resolver_with_reader(MockTupleReader::new(), dsl, tuples, config).await
}

pub async fn resolver_with_reader(
    reader: MockTupleReader,
    dsl: &str,
    tuples: &[(&str, &str, &str)],
    config: ResolverConfig,
) -> Arc<MockResolver> {
    for (object, relation, user) in tuples {
        reader.add(STORE, object, relation, user).await;
    }
    let models = MockModelReader::new();
    models.add_model(STORE, "model-1", dsl).await;
    Arc::new(GraphResolver::with_config(
        Arc::new(reader),
        Arc::new(models),
        config,
    ))
}

/// Resolver with the default configuration.
pub async fn resolver(dsl: &str, tuples: &[(&str, &str, &str)]) -> Arc<MockResolver> {
    resolver_with(dsl, tuples, ResolverConfig::default()).await
}
