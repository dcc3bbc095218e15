//! Authorization model commands.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use ulid::Ulid;

use relgraph_domain::error::{DomainError, DomainResult};
use relgraph_domain::model::AuthorizationModel;
use relgraph_domain::resolver::{ConsistencyPreference, ModelReader};
use relgraph_storage::{DataStore, PaginationOptions, StoredAuthorizationModel};

use super::read::page_size;
use crate::adapters::{storage_error, ModelIndex};

/// One page of model versions, newest first.
#[derive(Debug, Clone)]
pub struct ModelPage {
    pub models: Vec<AuthorizationModel>,
    pub continuation_token: Option<String>,
}

pub struct ModelHandler<S: DataStore> {
    storage: Arc<S>,
    models: Arc<ModelIndex<S>>,
}

impl<S: DataStore> ModelHandler<S> {
    pub fn new(storage: Arc<S>, models: Arc<ModelIndex<S>>) -> Self {
        Self { storage, models }
    }

    /// Validates and stores a new model version, returning its id.
    #[instrument(skip(self, model), fields(types = model.type_definitions.len()))]
    pub async fn write_authorization_model(
        &self,
        store_id: &str,
        model: AuthorizationModel,
    ) -> DomainResult<String> {
        let id = Ulid::new().to_string();
        let validated = ModelIndex::<S>::validate(model.with_id(&id))?;
        let model_json =
            serde_json::to_string(validated.model()).map_err(|e| DomainError::Internal {
                message: format!("model could not be serialized: {e}"),
            })?;

        self.storage
            .write_authorization_model(StoredAuthorizationModel {
                id: id.clone(),
                store_id: store_id.to_string(),
                schema_version: validated.model().schema_version.clone(),
                model_json,
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| storage_error(store_id, e))?;
        self.models.invalidate_latest(store_id).await;

        info!(model_id = %id, "authorization model written");
        Ok(id)
    }

    pub async fn read_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> DomainResult<AuthorizationModel> {
        let model = self
            .models
            .get_model(store_id, Some(model_id), ConsistencyPreference::default())
            .await?;
        Ok(model.model().clone())
    }

    #[instrument(skip(self, continuation_token))]
    pub async fn read_authorization_models(
        &self,
        store_id: &str,
        page_size_hint: Option<u32>,
        continuation_token: Option<String>,
    ) -> DomainResult<ModelPage> {
        let pagination =
            PaginationOptions::new(page_size(page_size_hint)?).with_token(continuation_token);
        let page = self
            .storage
            .list_authorization_models(store_id, &pagination)
            .await
            .map_err(|e| storage_error(store_id, e))?;

        let models = page
            .items
            .iter()
            .map(|stored| ModelIndex::<S>::decode(stored).map(|m| m.model().clone()))
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(ModelPage {
            models,
            continuation_token: page.continuation_token,
        })
    }
}
