//! Tuple writes.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument};

use relgraph_domain::error::{DomainError, DomainResult};
use relgraph_domain::model::TupleKey;
use relgraph_domain::resolver::{ConsistencyPreference, ModelReader};
use relgraph_storage::{DataStore, StoredTuple};

use crate::adapters::{storage_error, stored_tuple, ModelIndex};

/// Tuples to add and remove in one atomic batch.
#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    pub store_id: String,
    /// Model to validate against; the latest when absent.
    pub authorization_model_id: Option<String>,
    pub writes: Vec<TupleKey>,
    pub deletes: Vec<TupleKey>,
}

impl WriteRequest {
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            ..Default::default()
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.authorization_model_id = Some(model_id.into());
        self
    }

    pub fn write(mut self, tuple: TupleKey) -> Self {
        self.writes.push(tuple);
        self
    }

    pub fn delete(mut self, tuple: TupleKey) -> Self {
        self.deletes.push(tuple);
        self
    }
}

/// Validates tuple batches against the model and applies them atomically.
pub struct WriteHandler<S: DataStore> {
    storage: Arc<S>,
    models: Arc<ModelIndex<S>>,
    max_tuples_per_write: usize,
}

impl<S: DataStore> WriteHandler<S> {
    pub fn new(storage: Arc<S>, models: Arc<ModelIndex<S>>, max_tuples_per_write: usize) -> Self {
        Self {
            storage,
            models,
            max_tuples_per_write,
        }
    }

    /// Checks the batch shape before anything is read.
    fn validate_shape(&self, request: &WriteRequest) -> DomainResult<()> {
        let total = request.writes.len() + request.deletes.len();
        if total == 0 {
            return Err(DomainError::InvalidParameter {
                parameter: "writes".to_string(),
                reason: "at least one write or delete is required".to_string(),
            });
        }
        if total > self.max_tuples_per_write {
            return Err(DomainError::InvalidParameter {
                parameter: "writes".to_string(),
                reason: format!(
                    "at most {} tuples per request, got {total}",
                    self.max_tuples_per_write
                ),
            });
        }

        let mut seen = HashSet::with_capacity(total);
        for tuple in request.writes.iter().chain(&request.deletes) {
            if !seen.insert(tuple) {
                return Err(DomainError::InvalidTuple {
                    tuple: tuple.to_string(),
                    reason: "tuple appears more than once in the request".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Applies the writes and deletes, or nothing.
    #[instrument(
        skip(self, request),
        fields(store_id = %request.store_id, writes = request.writes.len(), deletes = request.deletes.len())
    )]
    pub async fn write(&self, request: &WriteRequest) -> DomainResult<()> {
        self.validate_shape(request)?;

        let model = self
            .models
            .get_model(
                &request.store_id,
                request.authorization_model_id.as_deref(),
                ConsistencyPreference::HigherConsistency,
            )
            .await?;

        let writes = request
            .writes
            .iter()
            .map(|tuple| {
                let (object, user) = model.validate_tuple_for_write(tuple)?;
                Ok(stored_tuple(&object, &tuple.relation, &user))
            })
            .collect::<DomainResult<Vec<StoredTuple>>>()?;
        let deletes = request
            .deletes
            .iter()
            .map(|tuple| {
                let (object, user) = model.validate_tuple_reference(tuple)?;
                Ok(stored_tuple(&object, &tuple.relation, &user))
            })
            .collect::<DomainResult<Vec<StoredTuple>>>()?;

        self.storage
            .write_tuples(&request.store_id, writes, deletes)
            .await
            .map_err(|e| storage_error(&request.store_id, e))?;

        info!("tuples written");
        Ok(())
    }
}
