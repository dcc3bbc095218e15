//! Check: is a user related to an object?

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::error::DomainResult;
use crate::model::{ObjectRef, RelationDefinition, UserRef, Userset};

use super::context::ResolutionContext;
use super::evaluator::{all, any, but_not, BoxFuture};
use super::graph_resolver::GraphResolver;
use super::traits::{ModelReader, PageRequest, TupleReader};
use super::types::{CheckRequest, CheckResult};

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Checks if a user has a relation to an object.
    pub async fn check(&self, request: &CheckRequest) -> DomainResult<CheckResult> {
        self.check_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Like [`check`](Self::check), aborting with `Cancelled` once `cancel`
    /// fires. Cancellation reaches every in-flight branch and read.
    #[instrument(
        skip(self, request, cancel),
        fields(store_id = %request.store_id, object = %request.object, relation = %request.relation, user = %request.user)
    )]
    pub async fn check_with_cancellation(
        &self,
        request: &CheckRequest,
        cancel: CancellationToken,
    ) -> DomainResult<CheckResult> {
        let object = ObjectRef::parse(&request.object)?;
        let user = UserRef::parse(&request.user)?;

        let model = self
            .load_model(
                &request.store_id,
                request.authorization_model_id.as_deref(),
                request.consistency,
            )
            .await?;
        model.get_relation(&object.object_type, &request.relation)?;
        model.validate_user(&user)?;

        let ctx = self.context(&request.store_id, model, cancel.child_token());
        let allowed = self
            .with_timeout(self.resolve_check(
                ctx,
                object,
                request.relation.clone(),
                Arc::new(user),
            ))
            .await?;

        debug!(allowed, "check resolved");
        Ok(CheckResult { allowed })
    }

    /// Resolves `user ∈ object#relation` under `ctx`.
    pub(crate) fn resolve_check<'a>(
        &'a self,
        ctx: ResolutionContext,
        object: ObjectRef,
        relation: String,
        user: Arc<UserRef>,
    ) -> BoxFuture<'a, DomainResult<bool>> {
        Box::pin(async move {
            ctx.ensure_active()?;

            if let UserRef::Userset {
                user_type,
                user_id,
                relation: user_relation,
            } = user.as_ref()
            {
                if *user_type == object.object_type
                    && *user_id == object.object_id
                    && *user_relation == relation
                {
                    return Ok(true);
                }
            }

            let key = format!("{object}#{relation}");
            let Some(ctx) = ctx.with_visited(&key) else {
                trace!(key = %key, "cycle detected, resolving branch to false");
                return Ok(false);
            };
            let ctx = ctx.descend()?;

            let model = Arc::clone(&ctx.model);
            let relation_def = model.get_relation(&object.object_type, &relation)?;
            self.check_userset(&ctx, &object, relation_def, &relation_def.rewrite, &user)
                .await
        })
    }

    fn check_userset<'a>(
        &'a self,
        ctx: &'a ResolutionContext,
        object: &'a ObjectRef,
        relation_def: &'a RelationDefinition,
        userset: &'a Userset,
        user: &'a Arc<UserRef>,
    ) -> BoxFuture<'a, DomainResult<bool>> {
        Box::pin(async move {
            match userset {
                Userset::This => self.check_direct(ctx, object, relation_def, user).await,
                Userset::ComputedUserset { relation } => {
                    self.resolve_check(
                        ctx.clone(),
                        object.clone(),
                        relation.clone(),
                        Arc::clone(user),
                    )
                    .await
                }
                Userset::TupleToUserset {
                    tupleset,
                    computed_userset,
                } => {
                    self.check_tuple_to_userset(ctx, object, tupleset, computed_userset, user)
                        .await
                }
                Userset::Union { children } => {
                    let branches = children
                        .iter()
                        .map(|child| self.check_userset(ctx, object, relation_def, child, user))
                        .collect();
                    any(branches, self.config.max_breadth).await
                }
                Userset::Intersection { children } => {
                    let branches = children
                        .iter()
                        .map(|child| self.check_userset(ctx, object, relation_def, child, user))
                        .collect();
                    all(branches, self.config.max_breadth).await
                }
                Userset::Exclusion { base, subtract } => {
                    but_not(
                        self.check_userset(ctx, object, relation_def, base, user),
                        self.check_userset(ctx, object, relation_def, subtract, user),
                    )
                    .await
                }
            }
        })
    }

    /// Direct tuples: exact user, then the type wildcard, then usersets.
    async fn check_direct(
        &self,
        ctx: &ResolutionContext,
        object: &ObjectRef,
        relation_def: &RelationDefinition,
        user: &Arc<UserRef>,
    ) -> DomainResult<bool> {
        let relation = relation_def.name.as_str();

        if relation_def.admits(user) {
            let found = ctx
                .read(
                    self.tuple_reader
                        .read_user_tuple(&ctx.store_id, object, relation, user),
                )
                .await?;
            if found.is_some() {
                return Ok(true);
            }
        }

        if let UserRef::Object { user_type, .. } = user.as_ref() {
            let wildcard = UserRef::wildcard(user_type.clone());
            if relation_def.admits(&wildcard) {
                let found = ctx
                    .read(
                        self.tuple_reader
                            .read_user_tuple(&ctx.store_id, object, relation, &wildcard),
                    )
                    .await?;
                if found.is_some() {
                    return Ok(true);
                }
            }
        }

        let mut page = PageRequest::new(self.config.read_page_size);
        let mut first_error = None;
        loop {
            let result = ctx
                .read(
                    self.tuple_reader
                        .read_userset_tuples(&ctx.store_id, object, relation, &page),
                )
                .await?;

            let branches: Vec<_> = result
                .items
                .into_iter()
                .filter(|tuple| relation_def.admits(&tuple.to_user_ref()))
                .filter_map(|tuple| {
                    let user_relation = tuple.user_relation?;
                    Some(self.resolve_check(
                        ctx.clone(),
                        ObjectRef::new(tuple.user_type, tuple.user_id),
                        user_relation,
                        Arc::clone(user),
                    ))
                })
                .collect();

            match any(branches, self.config.max_breadth).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }

            match result.continuation_token {
                Some(token) => page = page.next(token),
                None => break,
            }
        }
        first_error.map_or(Ok(false), Err)
    }

    /// `computed_userset from tupleset`: each related object of a type that
    /// defines the computed relation is checked in turn.
    async fn check_tuple_to_userset(
        &self,
        ctx: &ResolutionContext,
        object: &ObjectRef,
        tupleset: &str,
        computed_userset: &str,
        user: &Arc<UserRef>,
    ) -> DomainResult<bool> {
        let mut page = PageRequest::new(self.config.read_page_size);
        let mut first_error = None;
        loop {
            let result = ctx
                .read(
                    self.tuple_reader
                        .read_object_tuples(&ctx.store_id, object, tupleset, &page),
                )
                .await?;

            let branches: Vec<_> = result
                .items
                .into_iter()
                .filter(|parent| {
                    parent.user_relation.is_none()
                        && !parent.is_wildcard()
                        && ctx.model.has_relation(&parent.user_type, computed_userset)
                })
                .map(|parent| {
                    self.resolve_check(
                        ctx.clone(),
                        ObjectRef::new(parent.user_type, parent.user_id),
                        computed_userset.to_string(),
                        Arc::clone(user),
                    )
                })
                .collect();

            match any(branches, self.config.max_breadth).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }

            match result.continuation_token {
                Some(token) => page = page.next(token),
                None => break,
            }
        }
        first_error.map_or(Ok(false), Err)
    }
}
