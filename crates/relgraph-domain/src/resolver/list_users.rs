//! ListUsers: every user of the requested types related to an object.
//!
//! Candidates are collected by walking the relation's rewrite forward and
//! reading the tuples it names. Operators are not evaluated during
//! collection, so the candidate set is a superset; each candidate that
//! matches a filter is then confirmed with a Check.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::error::{DomainError, DomainResult};
use crate::model::{ObjectRef, RelationDefinition, UserRef, Userset};

use super::context::ResolutionContext;
use super::evaluator::BoxFuture;
use super::graph_resolver::GraphResolver;
use super::traits::{ModelReader, TupleReader};
use super::types::{ListUsersRequest, ListUsersResult, UserFilter};

#[derive(Debug, Clone)]
struct Candidate {
    user: UserRef,
    /// Reached through the subtract side of an exclusion.
    subtracted: bool,
}

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Lists the users matching `user_filters` that have the relation on
    /// the object, ordered.
    #[instrument(
        skip(self, request),
        fields(store_id = %request.store_id, object = %request.object, relation = %request.relation)
    )]
    pub async fn list_users(&self, request: &ListUsersRequest) -> DomainResult<ListUsersResult> {
        if request.user_filters.is_empty() {
            return Err(DomainError::InvalidParameter {
                parameter: "user_filters".to_string(),
                reason: "at least one filter is required".to_string(),
            });
        }
        let object = ObjectRef::parse(&request.object)?;

        let model = self
            .load_model(
                &request.store_id,
                request.authorization_model_id.as_deref(),
                request.consistency,
            )
            .await?;
        model.get_relation(&object.object_type, &request.relation)?;
        for filter in &request.user_filters {
            match &filter.relation {
                Some(relation) => {
                    model.get_relation(&filter.type_name, relation)?;
                }
                None => {
                    model.get_type(&filter.type_name)?;
                }
            }
        }

        let ctx = self.context(&request.store_id, model, CancellationToken::new());
        self.with_timeout(self.resolve_users(
            &ctx,
            object,
            &request.relation,
            &request.user_filters,
        ))
        .await
    }

    async fn resolve_users(
        &self,
        ctx: &ResolutionContext,
        object: ObjectRef,
        relation: &str,
        filters: &[UserFilter],
    ) -> DomainResult<ListUsersResult> {
        let candidates = self
            .collect_candidates(ctx.clone(), object.clone(), relation.to_string(), false)
            .await?;

        let mut unique: HashMap<UserRef, bool> = HashMap::new();
        for candidate in candidates {
            if filters.iter().any(|f| f.matches(&candidate.user)) {
                *unique.entry(candidate.user).or_default() |= candidate.subtracted;
            }
        }
        let mut unique: Vec<(UserRef, bool)> = unique.into_iter().collect();
        unique.sort();
        trace!(candidates = unique.len(), "verifying list users candidates");

        let verifications: Vec<_> = unique
            .into_iter()
            .map(|(user, subtracted)| {
                let check = self.resolve_check(
                    ctx.fresh_branch(),
                    object.clone(),
                    relation.to_string(),
                    Arc::new(user.clone()),
                );
                async move { (user, subtracted, check.await) }
            })
            .collect();
        let mut verifications =
            stream::iter(verifications).buffer_unordered(self.config.max_breadth.max(1));

        let mut users = Vec::new();
        let mut rejected = Vec::new();
        let mut truncated = false;
        while let Some((user, subtracted, result)) = verifications.next().await {
            match result {
                Ok(true) => users.push(user),
                Ok(false) if subtracted => rejected.push(user),
                Ok(false) => {}
                Err(DomainError::Cancelled) => return Err(DomainError::Cancelled),
                Err(e) => {
                    warn!(user = %user, error = %e, "skipping unverifiable candidate");
                    truncated = true;
                }
            }
        }

        users.sort();
        let max_results = self.config.list_objects_max_results;
        if users.len() > max_results {
            users.truncate(max_results);
            truncated = true;
        }

        let mut excluded_users: Vec<UserRef> = rejected
            .into_iter()
            .filter(|user| {
                !user.is_wildcard()
                    && user.relation().is_none()
                    && users.contains(&UserRef::wildcard(user.user_type()))
            })
            .collect();
        excluded_users.sort();

        debug!(
            users = users.len(),
            excluded = excluded_users.len(),
            truncated,
            "list users resolved"
        );
        Ok(ListUsersResult {
            users,
            excluded_users,
            truncated,
        })
    }

    /// Every user written anywhere beneath `object#relation`.
    fn collect_candidates<'a>(
        &'a self,
        ctx: ResolutionContext,
        object: ObjectRef,
        relation: String,
        subtracted: bool,
    ) -> BoxFuture<'a, DomainResult<Vec<Candidate>>> {
        Box::pin(async move {
            let key = format!("{object}#{relation}");
            let Some(ctx) = ctx.with_visited(&key) else {
                trace!(key = %key, "cycle detected, no further candidates");
                return Ok(Vec::new());
            };
            let ctx = ctx.descend()?;

            let model = Arc::clone(&ctx.model);
            let relation_def = model.get_relation(&object.object_type, &relation)?;
            self.collect_userset(&ctx, &object, relation_def, &relation_def.rewrite, subtracted)
                .await
        })
    }

    fn collect_userset<'a>(
        &'a self,
        ctx: &'a ResolutionContext,
        object: &'a ObjectRef,
        relation_def: &'a RelationDefinition,
        userset: &'a Userset,
        subtracted: bool,
    ) -> BoxFuture<'a, DomainResult<Vec<Candidate>>> {
        Box::pin(async move {
            let mut found = Vec::new();
            let nested: Vec<BoxFuture<'a, DomainResult<Vec<Candidate>>>> = match userset {
                Userset::This => {
                    let tuples = self
                        .read_all_object_tuples(ctx, object, &relation_def.name)
                        .await?;
                    let mut nested = Vec::new();
                    for tuple in tuples {
                        if let Some(user_relation) = &tuple.user_relation {
                            nested.push(self.collect_candidates(
                                ctx.clone(),
                                ObjectRef::new(&tuple.user_type, &tuple.user_id),
                                user_relation.clone(),
                                subtracted,
                            ));
                        }
                        found.push(Candidate {
                            user: tuple.to_user_ref(),
                            subtracted,
                        });
                    }
                    nested
                }
                Userset::ComputedUserset { relation } => vec![self.collect_candidates(
                    ctx.clone(),
                    object.clone(),
                    relation.clone(),
                    subtracted,
                )],
                Userset::TupleToUserset {
                    tupleset,
                    computed_userset,
                } => self
                    .read_all_object_tuples(ctx, object, tupleset)
                    .await?
                    .into_iter()
                    .filter(|p| {
                        p.user_relation.is_none()
                            && !p.is_wildcard()
                            && ctx.model.has_relation(&p.user_type, computed_userset)
                    })
                    .map(|p| {
                        self.collect_candidates(
                            ctx.clone(),
                            ObjectRef::new(p.user_type, p.user_id),
                            computed_userset.clone(),
                            subtracted,
                        )
                    })
                    .collect(),
                Userset::Union { children } | Userset::Intersection { children } => children
                    .iter()
                    .map(|child| self.collect_userset(ctx, object, relation_def, child, subtracted))
                    .collect(),
                Userset::Exclusion { base, subtract } => vec![
                    self.collect_userset(ctx, object, relation_def, base, subtracted),
                    self.collect_userset(ctx, object, relation_def, subtract, true),
                ],
            };

            let per_branch: Vec<Vec<Candidate>> = stream::iter(nested)
                .buffer_unordered(self.config.max_breadth.max(1))
                .try_collect()
                .await?;
            found.extend(per_branch.into_iter().flatten());
            Ok(found)
        })
    }
}
