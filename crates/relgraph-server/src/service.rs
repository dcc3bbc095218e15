//! The `relgraph.v1.RelgraphService` facade.
//!
//! One async method per RPC. Every call records
//! `relgraph_rpc_handled_total` and `relgraph_rpc_handling_seconds` under the
//! full method name `/relgraph.v1.RelgraphService/<Method>`; the code label is
//! the error's stable status name or `OK`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::{Stream, StreamExt};
use tracing::debug;

use relgraph_domain::error::DomainResult;
use relgraph_domain::model::AuthorizationModel;
use relgraph_domain::resolver::{
    CheckRequest, CheckResult, ExpandRequest, ExpandResult, GraphResolver, ListObjectsRequest,
    ListObjectsResult, ListUsersRequest, ListUsersResult, ObjectStream,
};
use relgraph_storage::{DataStore, InstrumentedDataStore, MemoryDataStore, Store};

use crate::adapters::{DataStoreTupleReader, ModelIndex};
use crate::config::{ConfigLoadError, ServerConfig};
use crate::handlers::{
    Assertion, AssertionHandler, ChangePage, ModelHandler, ModelPage, ReadFilter, ReadHandler,
    StoreHandler, StorePage, TuplePage, WriteHandler, WriteRequest,
};
use crate::observability::record_rpc;

pub const SERVICE_NAME: &str = "relgraph.v1.RelgraphService";

/// The resolver the service runs queries on.
pub type Resolver<S> = GraphResolver<DataStoreTupleReader<S>, ModelIndex<S>>;

fn code_of<T>(result: &DomainResult<T>) -> &'static str {
    match result {
        Ok(_) => "OK",
        Err(e) => e.code().as_str(),
    }
}

fn record(method: &str, code: &str, start: Instant) {
    record_rpc(
        &format!("/{SERVICE_NAME}/{method}"),
        code,
        start.elapsed().as_secs_f64(),
    );
}

/// Authorization service over a datastore.
pub struct RelgraphService<S: DataStore> {
    resolver: Arc<Resolver<S>>,
    writes: WriteHandler<S>,
    assertions: AssertionHandler<S>,
    models: ModelHandler<S>,
    reads: ReadHandler<S>,
    stores: StoreHandler<S>,
}

impl RelgraphService<InstrumentedDataStore<MemoryDataStore>> {
    /// Builds the service over the backend the configuration names.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigLoadError> {
        config.validate()?;
        match config.storage.backend.as_str() {
            "memory" => Ok(Self::new(
                Arc::new(InstrumentedDataStore::new(MemoryDataStore::new())),
                config,
            )),
            other => Err(ConfigLoadError::Invalid {
                message: format!("storage.backend '{other}' is not available"),
            }),
        }
    }
}

impl<S: DataStore> RelgraphService<S> {
    pub fn new(storage: Arc<S>, config: &ServerConfig) -> Self {
        let models = Arc::new(ModelIndex::new(Arc::clone(&storage), &config.model_cache));
        let resolver = Arc::new(GraphResolver::with_config(
            Arc::new(DataStoreTupleReader::new(Arc::clone(&storage))),
            Arc::clone(&models),
            config.resolver_config(),
        ));

        Self {
            resolver,
            writes: WriteHandler::new(
                Arc::clone(&storage),
                Arc::clone(&models),
                config.storage.max_tuples_per_write,
            ),
            assertions: AssertionHandler::new(Arc::clone(&storage), Arc::clone(&models)),
            models: ModelHandler::new(Arc::clone(&storage), Arc::clone(&models)),
            reads: ReadHandler::new(Arc::clone(&storage)),
            stores: StoreHandler::new(storage, models),
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver<S>> {
        &self.resolver
    }

    async fn observe<T, F>(&self, method: &'static str, call: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        let start = Instant::now();
        let result = call.await;
        let code = code_of(&result);
        if let Err(e) = &result {
            debug!(method, code, error = %e, "rpc failed");
        }
        record(method, code, start);
        result
    }

    // Queries

    pub async fn check(&self, request: &CheckRequest) -> DomainResult<CheckResult> {
        self.observe("Check", self.resolver.check(request)).await
    }

    pub async fn expand(&self, request: &ExpandRequest) -> DomainResult<ExpandResult> {
        self.observe("Expand", self.resolver.expand(request)).await
    }

    pub async fn list_objects(&self, request: &ListObjectsRequest) -> DomainResult<ListObjectsResult> {
        self.observe("ListObjects", self.resolver.list_objects(request))
            .await
    }

    /// Streams objects as ReverseExpand finds them. The call is recorded
    /// when the stream ends.
    pub async fn streamed_list_objects(
        &self,
        request: &ListObjectsRequest,
    ) -> DomainResult<MonitoredStream> {
        const METHOD: &str = "StreamedListObjects";
        let start = Instant::now();
        match self.resolver.reverse_expand(request).await {
            Ok(inner) => Ok(MonitoredStream {
                inner,
                method: METHOD,
                start,
                finished: false,
            }),
            Err(e) => {
                record(METHOD, e.code().as_str(), start);
                Err(e)
            }
        }
    }

    pub async fn list_users(&self, request: &ListUsersRequest) -> DomainResult<ListUsersResult> {
        self.observe("ListUsers", self.resolver.list_users(request))
            .await
    }

    // Tuples

    pub async fn write(&self, request: &WriteRequest) -> DomainResult<()> {
        self.observe("Write", self.writes.write(request)).await
    }

    pub async fn read(
        &self,
        store_id: &str,
        filter: &ReadFilter,
        page_size: Option<u32>,
        continuation_token: Option<String>,
    ) -> DomainResult<TuplePage> {
        self.observe(
            "Read",
            self.reads.read(store_id, filter, page_size, continuation_token),
        )
        .await
    }

    pub async fn read_changes(
        &self,
        store_id: &str,
        object_type: Option<&str>,
        page_size: Option<u32>,
        continuation_token: Option<String>,
    ) -> DomainResult<ChangePage> {
        self.observe(
            "ReadChanges",
            self.reads
                .read_changes(store_id, object_type, page_size, continuation_token),
        )
        .await
    }

    // Models

    pub async fn write_authorization_model(
        &self,
        store_id: &str,
        model: AuthorizationModel,
    ) -> DomainResult<String> {
        self.observe(
            "WriteAuthorizationModel",
            self.models.write_authorization_model(store_id, model),
        )
        .await
    }

    pub async fn read_authorization_model(
        &self,
        store_id: &str,
        model_id: &str,
    ) -> DomainResult<AuthorizationModel> {
        self.observe(
            "ReadAuthorizationModel",
            self.models.read_authorization_model(store_id, model_id),
        )
        .await
    }

    pub async fn read_authorization_models(
        &self,
        store_id: &str,
        page_size: Option<u32>,
        continuation_token: Option<String>,
    ) -> DomainResult<ModelPage> {
        self.observe(
            "ReadAuthorizationModels",
            self.models
                .read_authorization_models(store_id, page_size, continuation_token),
        )
        .await
    }

    // Assertions

    pub async fn write_assertions(
        &self,
        store_id: &str,
        model_id: &str,
        assertions: Vec<Assertion>,
    ) -> DomainResult<()> {
        self.observe(
            "WriteAssertions",
            self.assertions.write_assertions(store_id, model_id, assertions),
        )
        .await
    }

    pub async fn read_assertions(&self, store_id: &str, model_id: &str) -> DomainResult<Vec<Assertion>> {
        self.observe(
            "ReadAssertions",
            self.assertions.read_assertions(store_id, model_id),
        )
        .await
    }

    // Stores

    pub async fn create_store(&self, name: &str) -> DomainResult<Store> {
        self.observe("CreateStore", self.stores.create_store(name)).await
    }

    pub async fn get_store(&self, store_id: &str) -> DomainResult<Store> {
        self.observe("GetStore", self.stores.get_store(store_id)).await
    }

    pub async fn delete_store(&self, store_id: &str) -> DomainResult<()> {
        self.observe("DeleteStore", self.stores.delete_store(store_id))
            .await
    }

    pub async fn list_stores(
        &self,
        page_size: Option<u32>,
        continuation_token: Option<String>,
    ) -> DomainResult<StorePage> {
        self.observe(
            "ListStores",
            self.stores.list_stores(page_size, continuation_token),
        )
        .await
    }
}

/// An [`ObjectStream`] that records its RPC once it finishes: on exhaustion,
/// on the first error, or as `Cancelled` when dropped early.
pub struct MonitoredStream {
    inner: ObjectStream,
    method: &'static str,
    start: Instant,
    finished: bool,
}

impl MonitoredStream {
    /// Whether the run stopped early. Final once the stream has ended.
    pub fn truncated(&self) -> bool {
        self.inner.truncated()
    }

    pub fn model_id(&self) -> Option<&str> {
        self.inner.model_id()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    fn finish(&mut self, code: &str) {
        if !self.finished {
            self.finished = true;
            record(self.method, code, self.start);
        }
    }
}

impl Stream for MonitoredStream {
    type Item = DomainResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        match &polled {
            Poll::Ready(None) => self.finish("OK"),
            Poll::Ready(Some(Err(e))) => self.finish(e.code().as_str()),
            _ => {}
        }
        polled
    }
}

impl Drop for MonitoredStream {
    fn drop(&mut self) {
        self.finish("Cancelled");
    }
}
