//! Assertions: expected Check outcomes stored alongside a model version.

use std::sync::Arc;

use tracing::{debug, instrument};

use relgraph_domain::error::DomainResult;
use relgraph_domain::model::TupleKey;
use relgraph_domain::resolver::{ConsistencyPreference, ModelReader};
use relgraph_storage::{DataStore, StoredAssertion};

use crate::adapters::{storage_error, stored_tuple, tuple_key, ModelIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub tuple_key: TupleKey,
    pub expectation: bool,
}

impl Assertion {
    pub fn new(tuple_key: TupleKey, expectation: bool) -> Self {
        Self {
            tuple_key,
            expectation,
        }
    }
}

pub struct AssertionHandler<S: DataStore> {
    storage: Arc<S>,
    models: Arc<ModelIndex<S>>,
}

impl<S: DataStore> AssertionHandler<S> {
    pub fn new(storage: Arc<S>, models: Arc<ModelIndex<S>>) -> Self {
        Self { storage, models }
    }

    /// Replaces the model's assertions. Each tuple must be writable under
    /// that model.
    #[instrument(skip(self, assertions), fields(count = assertions.len()))]
    pub async fn write_assertions(
        &self,
        store_id: &str,
        model_id: &str,
        assertions: Vec<Assertion>,
    ) -> DomainResult<()> {
        let model = self
            .models
            .get_model(store_id, Some(model_id), ConsistencyPreference::default())
            .await?;

        let stored = assertions
            .iter()
            .map(|assertion| {
                let tuple = &assertion.tuple_key;
                let (object, user) = model.validate_tuple_for_write(tuple)?;
                Ok(StoredAssertion {
                    tuple: stored_tuple(&object, &tuple.relation, &user),
                    expectation: assertion.expectation,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        self.storage
            .write_assertions(store_id, model_id, stored)
            .await
            .map_err(|e| storage_error(store_id, e))?;
        debug!("assertions replaced");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn read_assertions(&self, store_id: &str, model_id: &str) -> DomainResult<Vec<Assertion>> {
        self.models
            .get_model(store_id, Some(model_id), ConsistencyPreference::default())
            .await?;

        let stored = self
            .storage
            .read_assertions(store_id, model_id)
            .await
            .map_err(|e| storage_error(store_id, e))?;
        Ok(stored
            .iter()
            .map(|a| Assertion::new(tuple_key(&a.tuple), a.expectation))
            .collect())
    }
}
