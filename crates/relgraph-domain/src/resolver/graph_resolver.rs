//! Graph resolver for permission queries.
//!
//! The resolver performs async graph traversal over one pinned model
//! version to answer Check, Expand, ListObjects and ListUsers.
//!
//! # Architecture Decisions
//!
//! - **Parallel Execution**: Union, intersection, exclusion and tuple fan-out
//!   are evaluated with `buffer_unordered`, bounded by `max_breadth`.
//!   Short-circuiting drops the losing branches.
//!
//! - **Cycle Detection**: A copy-on-write `object#relation` path set. A
//!   re-entrant key resolves to false / empty, never an error.
//!
//! - **Depth Limiting**: Default max depth of 25.
//!   Exceeding it is `DepthLimitExceeded`, distinct from "not allowed".
//!
//! - **Timeout Handling**: Check and Expand run under a configurable
//!   timeout; ListObjects has its own deadline and result cap.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{DomainError, DomainResult};
use crate::model::{ObjectRef, TypeSystem, UserRef};

use super::config::ResolverConfig;
use super::context::ResolutionContext;
use super::traits::{ModelReader, PageRequest, TupleReader};
use super::types::{ConsistencyPreference, StoredTupleRef};

/// Graph resolver for permission queries.
///
/// Holds no per-query state; every call builds its own
/// resolution context, so one resolver can serve any number of concurrent
/// queries.
pub struct GraphResolver<T, M> {
    pub(crate) tuple_reader: Arc<T>,
    pub(crate) model_reader: Arc<M>,
    pub(crate) config: ResolverConfig,
}

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Creates a new graph resolver with the default configuration.
    pub fn new(tuple_reader: Arc<T>, model_reader: Arc<M>) -> Self {
        Self::with_config(tuple_reader, model_reader, ResolverConfig::default())
    }

    pub fn with_config(tuple_reader: Arc<T>, model_reader: Arc<M>, config: ResolverConfig) -> Self {
        Self {
            tuple_reader,
            model_reader,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub(crate) async fn load_model(
        &self,
        store_id: &str,
        model_id: Option<&str>,
        consistency: ConsistencyPreference,
    ) -> DomainResult<Arc<TypeSystem>> {
        self.model_reader
            .get_model(store_id, model_id, consistency)
            .await
    }

    pub(crate) fn context(
        &self,
        store_id: &str,
        model: Arc<TypeSystem>,
        cancel: CancellationToken,
    ) -> ResolutionContext {
        ResolutionContext::new(store_id, model, &self.config, cancel)
    }

    /// Runs a resolution under the configured timeout.
    pub(crate) async fn with_timeout<R, F>(&self, resolution: F) -> DomainResult<R>
    where
        F: Future<Output = DomainResult<R>>,
    {
        tokio::time::timeout(self.config.timeout, resolution)
            .await
            .map_err(|_| DomainError::Timeout {
                duration_ms: u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    fn first_page(&self) -> PageRequest {
        PageRequest::new(self.config.read_page_size)
    }

    /// Every user of `object#relation`, paging transparently.
    pub(crate) async fn read_all_object_tuples(
        &self,
        ctx: &ResolutionContext,
        object: &ObjectRef,
        relation: &str,
    ) -> DomainResult<Vec<StoredTupleRef>> {
        let mut page = self.first_page();
        let mut tuples = Vec::new();
        loop {
            let result = ctx
                .read(
                    self.tuple_reader
                        .read_object_tuples(&ctx.store_id, object, relation, &page),
                )
                .await?;
            tuples.extend(result.items);
            match result.continuation_token {
                Some(token) => page = page.next(token),
                None => return Ok(tuples),
            }
        }
    }

    /// Ids of every `object_type` object with a tuple `(object, relation, user)`.
    pub(crate) async fn read_all_objects_for_user(
        &self,
        ctx: &ResolutionContext,
        object_type: &str,
        relation: &str,
        user: &UserRef,
    ) -> DomainResult<Vec<String>> {
        let mut page = self.first_page();
        let mut ids = Vec::new();
        loop {
            let result = ctx
                .read(self.tuple_reader.read_starting_with_user(
                    &ctx.store_id,
                    object_type,
                    relation,
                    user,
                    &page,
                ))
                .await?;
            ids.extend(result.items);
            match result.continuation_token {
                Some(token) => page = page.next(token),
                None => return Ok(ids),
            }
        }
    }
}
