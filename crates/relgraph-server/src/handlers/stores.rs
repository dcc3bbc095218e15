//! Store commands.

use std::sync::Arc;

use tracing::{info, instrument};
use ulid::Ulid;

use relgraph_domain::error::{DomainError, DomainResult};
use relgraph_storage::{DataStore, PaginationOptions, Store};

use super::read::page_size;
use crate::adapters::{storage_error, ModelIndex};

#[derive(Debug, Clone)]
pub struct StorePage {
    pub stores: Vec<Store>,
    pub continuation_token: Option<String>,
}

pub struct StoreHandler<S: DataStore> {
    storage: Arc<S>,
    models: Arc<ModelIndex<S>>,
}

impl<S: DataStore> StoreHandler<S> {
    pub fn new(storage: Arc<S>, models: Arc<ModelIndex<S>>) -> Self {
        Self { storage, models }
    }

    /// Creates a store under a fresh ULID.
    #[instrument(skip(self))]
    pub async fn create_store(&self, name: &str) -> DomainResult<Store> {
        if name.trim().is_empty() {
            return Err(DomainError::InvalidParameter {
                parameter: "name".to_string(),
                reason: "store name cannot be empty".to_string(),
            });
        }
        let id = Ulid::new().to_string();
        let store = self
            .storage
            .create_store(&id, name)
            .await
            .map_err(|e| storage_error(&id, e))?;
        info!(store_id = %store.id, "store created");
        Ok(store)
    }

    pub async fn get_store(&self, store_id: &str) -> DomainResult<Store> {
        self.storage
            .get_store(store_id)
            .await
            .map_err(|e| storage_error(store_id, e))
    }

    #[instrument(skip(self))]
    pub async fn delete_store(&self, store_id: &str) -> DomainResult<()> {
        self.storage
            .delete_store(store_id)
            .await
            .map_err(|e| storage_error(store_id, e))?;
        self.models.invalidate_store(store_id).await?;
        info!("store deleted");
        Ok(())
    }

    pub async fn list_stores(
        &self,
        page_size_hint: Option<u32>,
        continuation_token: Option<String>,
    ) -> DomainResult<StorePage> {
        let pagination =
            PaginationOptions::new(page_size(page_size_hint)?).with_token(continuation_token);
        let page = self
            .storage
            .list_stores(&pagination)
            .await
            .map_err(|e| storage_error("", e))?;
        Ok(StorePage {
            stores: page.items,
            continuation_token: page.continuation_token,
        })
    }
}
