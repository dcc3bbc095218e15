//! Client-side call metrics for any [`DataStore`].
//!
//! [`InstrumentedDataStore`] wraps a datastore and records, for every call,
//! a completion counter labelled with the outcome and a latency histogram:
//!
//! - `relgraph_datastore_handled_total{service, method, code}`
//! - `relgraph_datastore_handling_seconds{service, method}`

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::traits::{
    DataStore, PaginatedResult, PaginationOptions, Store, StoredAssertion,
    StoredAuthorizationModel, StoredTuple, TupleChange, TupleFilter,
};

pub const DATASTORE_HANDLED_TOTAL: &str = "relgraph_datastore_handled_total";
pub const DATASTORE_HANDLING_SECONDS: &str = "relgraph_datastore_handling_seconds";

const SERVICE: &str = "relgraph.storage.DataStore";

/// Registers metric descriptions with the installed recorder.
pub fn describe_datastore_metrics() {
    metrics::describe_counter!(
        DATASTORE_HANDLED_TOTAL,
        "Total number of datastore calls completed, regardless of success or failure."
    );
    metrics::describe_histogram!(
        DATASTORE_HANDLING_SECONDS,
        metrics::Unit::Seconds,
        "Latency of datastore calls until completion."
    );
}

/// A [`DataStore`] decorator that records call metrics.
#[derive(Debug)]
pub struct InstrumentedDataStore<S> {
    inner: S,
}

impl<S: DataStore> InstrumentedDataStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn observe<T, F>(&self, method: &'static str, call: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        let start = Instant::now();
        let result = call.await;
        let code = match &result {
            Ok(_) => "OK",
            Err(e) => e.status_name(),
        };

        metrics::counter!(
            DATASTORE_HANDLED_TOTAL,
            "service" => SERVICE,
            "method" => method,
            "code" => code
        )
        .increment(1);
        metrics::histogram!(
            DATASTORE_HANDLING_SECONDS,
            "service" => SERVICE,
            "method" => method
        )
        .record(start.elapsed().as_secs_f64());

        result
    }
}

#[async_trait]
impl<S: DataStore> DataStore for InstrumentedDataStore<S> {
    async fn create_store(&self, id: &str, name: &str) -> StorageResult<Store> {
        self.observe("CreateStore", self.inner.create_store(id, name))
            .await
    }

    async fn get_store(&self, id: &str) -> StorageResult<Store> {
        self.observe("GetStore", self.inner.get_store(id)).await
    }

    async fn delete_store(&self, id: &str) -> StorageResult<()> {
        self.observe("DeleteStore", self.inner.delete_store(id)).await
    }

    async fn list_stores(
        &self,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<Store>> {
        self.observe("ListStores", self.inner.list_stores(pagination))
            .await
    }

    async fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<StoredTuple>,
        deletes: Vec<StoredTuple>,
    ) -> StorageResult<()> {
        self.observe("Write", self.inner.write_tuples(store_id, writes, deletes))
            .await
    }

    async fn read_tuple(
        &self,
        store_id: &str,
        tuple: &StoredTuple,
    ) -> StorageResult<Option<StoredTuple>> {
        self.observe("ReadUserTuple", self.inner.read_tuple(store_id, tuple))
            .await
    }

    async fn read_tuples(
        &self,
        store_id: &str,
        filter: &TupleFilter,
    ) -> StorageResult<Vec<StoredTuple>> {
        self.observe("Read", self.inner.read_tuples(store_id, filter))
            .await
    }

    async fn read_tuples_paginated(
        &self,
        store_id: &str,
        filter: &TupleFilter,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<StoredTuple>> {
        self.observe(
            "ReadPage",
            self.inner.read_tuples_paginated(store_id, filter, pagination),
        )
        .await
    }

    async fn read_changes(
        &self,
        store_id: &str,
        object_type: Option<&str>,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<TupleChange>> {
        self.observe(
            "ReadChanges",
            self.inner.read_changes(store_id, object_type, pagination),
        )
        .await
    }

    async fn write_authorization_model(
        &self,
        model: StoredAuthorizationModel,
    ) -> StorageResult<StoredAuthorizationModel> {
        self.observe(
            "WriteAuthorizationModel",
            self.inner.write_authorization_model(model),
        )
        .await
    }

    async fn get_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> StorageResult<StoredAuthorizationModel> {
        self.observe(
            "ReadAuthorizationModel",
            self.inner.get_authorization_model(store_id, model_id),
        )
        .await
    }

    async fn list_authorization_models(
        &self,
        store_id: &str,
        pagination: &PaginationOptions,
    ) -> StorageResult<PaginatedResult<StoredAuthorizationModel>> {
        self.observe(
            "ReadAuthorizationModels",
            self.inner.list_authorization_models(store_id, pagination),
        )
        .await
    }

    async fn get_latest_authorization_model(
        &self,
        store_id: &str,
    ) -> StorageResult<StoredAuthorizationModel> {
        self.observe(
            "FindLatestAuthorizationModel",
            self.inner.get_latest_authorization_model(store_id),
        )
        .await
    }

    async fn write_assertions(
        &self,
        store_id: &str,
        model_id: &str,
        assertions: Vec<StoredAssertion>,
    ) -> StorageResult<()> {
        self.observe(
            "WriteAssertions",
            self.inner.write_assertions(store_id, model_id, assertions),
        )
        .await
    }

    async fn read_assertions(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> StorageResult<Vec<StoredAssertion>> {
        self.observe(
            "ReadAssertions",
            self.inner.read_assertions(store_id, model_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::memory::MemoryDataStore;

    #[tokio::test]
    async fn test_instrumented_store_passes_results_through() {
        let store = InstrumentedDataStore::new(MemoryDataStore::new());
        store.create_store("s1", "Test").await.unwrap();

        let tuple = StoredTuple::new("doc", "1", "viewer", "user", "anne", None);
        store
            .write_tuples("s1", vec![tuple.clone()], vec![])
            .await
            .unwrap();
        assert_eq!(store.read_tuple("s1", &tuple).await.unwrap(), Some(tuple));
        assert_eq!(store.inner().read_tuples("s1", &TupleFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_instrumented_store_passes_errors_through() {
        let store = InstrumentedDataStore::new(MemoryDataStore::new());
        let result = store.get_store("missing").await;
        assert!(matches!(result, Err(StorageError::StoreNotFound { .. })));
    }
}
