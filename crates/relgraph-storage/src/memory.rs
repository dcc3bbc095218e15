//! In-memory storage implementation.
//!
//! Every store lives in a single `DashMap` entry that owns its tuples, model
//! versions, assertions and change feed. Mutations take the entry's write lock
//! once, so a batch is validated and applied without interleaving with other
//! writers to the same store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    compare_tuples, encode_token, parse_user_filter, tuple_scope, validate_store_id, validate_tuple,
    ChangeCursor, DataStore, OffsetCursor, PaginatedResult, PaginationOptions, Store,
    StoredAssertion, StoredAuthorizationModel, StoredTuple, TupleChange, TupleCursor,
    TupleFilter, TupleOperation,
};

#[derive(Debug)]
struct StoreState {
    store: Store,
    tuples: HashSet<StoredTuple>,
    /// Insertion order; listings sort newest-first.
    models: Vec<StoredAuthorizationModel>,
    assertions: HashMap<String, Vec<StoredAssertion>>,
    changes: Vec<TupleChange>,
}

impl StoreState {
    fn new(store: Store) -> Self {
        Self {
            store,
            tuples: HashSet::new(),
            models: Vec::new(),
            assertions: HashMap::new(),
            changes: Vec::new(),
        }
    }

    fn has_model(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
    }

    fn head(&self) -> u64 {
        self.changes.last().map_or(0, |c| c.sequence)
    }
}

/// In-memory implementation of DataStore.
///
/// # Performance Characteristics
///
/// - **Write/delete tuple**: O(1) average per tuple (HashSet)
/// - **Read tuples**: O(N) in the number of tuples in the store
/// - **Paginated read**: O(N log N), results are sorted for stable cursors
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    stores: DashMap<String, StoreState>,
}

impl MemoryDataStore {
    /// Creates a new in-memory data store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory data store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn state(&self, store_id: &str) -> StorageResult<Ref<'_, String, StoreState>> {
        self.stores
            .get(store_id)
            .ok_or_else(|| StorageError::StoreNotFound {
                store_id: store_id.to_string(),
            })
    }

    fn state_mut(&self, store_id: &str) -> StorageResult<RefMut<'_, String, StoreState>> {
        self.stores
            .get_mut(store_id)
            .ok_or_else(|| StorageError::StoreNotFound {
                store_id: store_id.to_string(),
            })
    }
}

/// Sorts authorization models newest-first (created_at DESC, id DESC).
fn sort_models_newest_first(models: &mut [StoredAuthorizationModel]) {
    models.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

type UserFilter = (String, String, Option<String>);

fn matches_filter(tuple: &StoredTuple, filter: &TupleFilter, user: Option<&UserFilter>) -> bool {
    filter
        .object_type
        .as_ref()
        .map_or(true, |ot| &tuple.object_type == ot)
        && filter
            .object_id
            .as_ref()
            .map_or(true, |oi| &tuple.object_id == oi)
        && filter.relation.as_ref().map_or(true, |r| &tuple.relation == r)
        && user.map_or(true, |(ut, ui, ur)| {
            &tuple.user_type == ut && &tuple.user_id == ui && &tuple.user_relation == ur
        })
}

fn offset_page<T>(
    items: Vec<T>,
    kind: &str,
    scope: &str,
    pagination: &PaginationOptions,
) -> StorageResult<PaginatedResult<T>> {
    let page_size = pagination.effective_page_size()?;
    let offset = OffsetCursor::parse(&pagination.continuation_token, kind, scope, items.len())?;
    let total = items.len();
    let items: Vec<T> = items.into_iter().skip(offset).take(page_size).collect();

    let next_offset = offset + items.len();
    let continuation_token = if next_offset < total {
        Some(encode_token(&OffsetCursor::new(kind, scope, next_offset))?)
    } else {
        None
    };

    Ok(PaginatedResult {
        items,
        continuation_token,
    })
}

#[async_trait]
impl DataStore for MemoryDataStore {
    #[instrument(skip(self), fields(store_id = %id))]
    async fn create_store(&self, id: &str, name: &str) -> StorageResult<Store> {
        validate_store_id(id)?;
        if name.trim().is_empty() {
            return Err(StorageError::InvalidInput {
                message: "store name cannot be empty".to_string(),
            });
        }

        let now = chrono::Utc::now();
        let store = Store {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        match self.stores.entry(id.to_string()) {
            Entry::Occupied(_) => Err(StorageError::StoreAlreadyExists {
                store_id: id.to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(StoreState::new(store.clone()));
                Ok(store)
            }
        }
    }

    async fn get_store(&self, id: &str) -> StorageResult<Store> {
        Ok(self.state(id)?.store.clone())
    }

    async fn delete_store(&self, id: &str) -> StorageResult<()> {
        self.stores
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::StoreNotFound {
                store_id: id.to_string(),
            })
    }

    async fn list_stores(
        &self,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<Store>> {
        let mut stores: Vec<Store> = self.stores.iter().map(|s| s.store.clone()).collect();
        stores.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        offset_page(stores, "stores", "", pagination)
    }

    #[instrument(skip(self, writes, deletes), fields(store_id = %store_id, writes = writes.len(), deletes = deletes.len()))]
    async fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<StoredTuple>,
        deletes: Vec<StoredTuple>,
    ) -> StorageResult<()> {
        validate_store_id(store_id)?;
        for tuple in writes.iter().chain(deletes.iter()) {
            validate_tuple(tuple)?;
        }

        let mut state = self.state_mut(store_id)?;

        // Validate the whole batch before touching anything.
        let mut deleted: HashSet<&StoredTuple> = HashSet::with_capacity(deletes.len());
        for tuple in &deletes {
            if !state.tuples.contains(tuple) || !deleted.insert(tuple) {
                return Err(StorageError::TupleNotFound {
                    object_type: tuple.object_type.clone(),
                    object_id: tuple.object_id.clone(),
                    relation: tuple.relation.clone(),
                    user: tuple.user(),
                });
            }
        }
        let mut written: HashSet<&StoredTuple> = HashSet::with_capacity(writes.len());
        for tuple in &writes {
            let exists = state.tuples.contains(tuple) && !deleted.contains(tuple);
            if exists || !written.insert(tuple) {
                return Err(StorageError::DuplicateTuple {
                    object_type: tuple.object_type.clone(),
                    object_id: tuple.object_id.clone(),
                    relation: tuple.relation.clone(),
                    user: tuple.user(),
                });
            }
        }
        drop(deleted);
        drop(written);

        let now = chrono::Utc::now();
        let mut sequence = state.head();
        let mut changes = Vec::with_capacity(writes.len() + deletes.len());

        for tuple in deletes {
            state.tuples.remove(&tuple);
            sequence += 1;
            changes.push(TupleChange {
                tuple,
                operation: TupleOperation::Delete,
                timestamp: now,
                sequence,
            });
        }
        for tuple in writes {
            state.tuples.insert(tuple.clone());
            sequence += 1;
            changes.push(TupleChange {
                tuple,
                operation: TupleOperation::Write,
                timestamp: now,
                sequence,
            });
        }
        state.changes.extend(changes);

        debug!(head = sequence, "tuple batch applied");
        Ok(())
    }

    async fn read_tuple(
        &self,
        store_id: &str,
        tuple: &StoredTuple,
    ) -> StorageResult<Option<StoredTuple>> {
        let state = self.state(store_id)?;
        Ok(state.tuples.get(tuple).cloned())
    }

    async fn read_tuples(
        &self,
        store_id: &str,
        filter: &TupleFilter,
    ) -> StorageResult<Vec<StoredTuple>> {
        let user_filter = filter.user.as_deref().map(parse_user_filter).transpose()?;
        let state = self.state(store_id)?;

        let mut tuples: Vec<StoredTuple> = state
            .tuples
            .iter()
            .filter(|t| matches_filter(t, filter, user_filter.as_ref()))
            .cloned()
            .collect();
        tuples.sort_by(compare_tuples);
        Ok(tuples)
    }

    async fn read_tuples_paginated(
        &self,
        store_id: &str,
        filter: &TupleFilter,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<StoredTuple>> {
        let page_size = pagination.effective_page_size()?;
        let scope = tuple_scope(store_id, filter);
        let cursor = TupleCursor::parse(&pagination.continuation_token, &scope)?;
        let filtered = self.read_tuples(store_id, filter).await?;

        let start = match cursor {
            Some(ref cursor) => filtered.partition_point(|t| {
                compare_tuples(t, &cursor.last) != std::cmp::Ordering::Greater
            }),
            None => 0,
        };

        let remaining = filtered.len().saturating_sub(start);
        let items: Vec<StoredTuple> = filtered.into_iter().skip(start).take(page_size).collect();

        let continuation_token = match items.last() {
            Some(last) if remaining > items.len() => {
                Some(encode_token(&TupleCursor::after(&scope, last))?)
            }
            _ => None,
        };

        Ok(PaginatedResult {
            items,
            continuation_token,
        })
    }

    async fn read_changes(
        &self,
        store_id: &str,
        object_type: Option<&str>,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<TupleChange>> {
        let page_size = pagination.effective_page_size()?;
        let object_type = object_type.map(str::to_string);
        let state = self.state(store_id)?;
        let after = ChangeCursor::parse(&pagination.continuation_token, store_id, &object_type, state.head())?;

        let items: Vec<TupleChange> = state
            .changes
            .iter()
            .filter(|c| c.sequence > after)
            .filter(|c| {
                object_type
                    .as_deref()
                    .map_or(true, |ot| c.tuple.object_type == ot)
            })
            .take(page_size)
            .cloned()
            .collect();

        let continuation_token = match items.last() {
            Some(last) => Some(encode_token(&ChangeCursor::new(store_id, last.sequence, object_type))?),
            None => pagination.continuation_token.clone(),
        };

        Ok(PaginatedResult {
            items,
            continuation_token,
        })
    }

    #[instrument(skip(self, model), fields(store_id = %model.store_id, model_id = %model.id))]
    async fn write_authorization_model(
        &self,
        model: StoredAuthorizationModel,
    ) -> StorageResult<StoredAuthorizationModel> {
        validate_store_id(&model.store_id)?;
        let mut state = self.state_mut(&model.store_id)?;
        if state.has_model(&model.id) {
            return Err(StorageError::InvalidInput {
                message: format!("authorization model {} already exists", model.id),
            });
        }
        state.models.push(model.clone());
        Ok(model)
    }

    async fn get_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> StorageResult<StoredAuthorizationModel> {
        let state = self.state(store_id)?;
        state
            .models
            .iter()
            .find(|m| m.id == model_id)
            .cloned()
            .ok_or_else(|| StorageError::ModelNotFound {
                model_id: model_id.to_string(),
            })
    }

    async fn list_authorization_models(
        &self,
        store_id: &str,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<StoredAuthorizationModel>> {
        let mut models = self.state(store_id)?.models.clone();
        sort_models_newest_first(&mut models);
        offset_page(models, "models", store_id, pagination)
    }

    async fn get_latest_authorization_model(
        &self,
        store_id: &str,
    ) -> StorageResult<StoredAuthorizationModel> {
        let mut models = self.state(store_id)?.models.clone();
        sort_models_newest_first(&mut models);
        models
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::ModelNotFound {
                model_id: format!("latest (no models exist for store {store_id})"),
            })
    }

    async fn write_assertions(
        &self,
        store_id: &str,
        model_id: &str,
        assertions: Vec<StoredAssertion>,
    ) -> StorageResult<()> {
        let mut state = self.state_mut(store_id)?;
        if !state.has_model(model_id) {
            return Err(StorageError::ModelNotFound {
                model_id: model_id.to_string(),
            });
        }
        state.assertions.insert(model_id.to_string(), assertions);
        Ok(())
    }

    async fn read_assertions(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> StorageResult<Vec<StoredAssertion>> {
        let state = self.state(store_id)?;
        if !state.has_model(model_id) {
            return Err(StorageError::ModelNotFound {
                model_id: model_id.to_string(),
            });
        }
        Ok(state.assertions.get(model_id).cloned().unwrap_or_default())
    }
}
