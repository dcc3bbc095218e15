//! Expand: the userset tree behind a relation.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace};

use crate::error::DomainResult;
use crate::model::{ObjectRef, RelationDefinition, Userset};

use super::context::ResolutionContext;
use super::evaluator::BoxFuture;
use super::graph_resolver::GraphResolver;
use super::traits::{ModelReader, TupleReader};
use super::types::{
    ExpandLeaf, ExpandLeafValue, ExpandNode, ExpandRequest, ExpandResult, UsersetTree,
};

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Expands a relation into a tree that mirrors its rewrite.
    #[instrument(
        skip(self, request),
        fields(store_id = %request.store_id, object = %request.object, relation = %request.relation, depth = request.depth)
    )]
    pub async fn expand(&self, request: &ExpandRequest) -> DomainResult<ExpandResult> {
        let object = ObjectRef::parse(&request.object)?;
        let model = self
            .load_model(
                &request.store_id,
                request.authorization_model_id.as_deref(),
                request.consistency,
            )
            .await?;
        model.get_relation(&object.object_type, &request.relation)?;

        let ctx = self.context(&request.store_id, model, CancellationToken::new());
        let root = self
            .with_timeout(self.expand_relation(
                ctx,
                object,
                request.relation.clone(),
                request.depth.max(1),
            ))
            .await?;

        Ok(ExpandResult {
            tree: UsersetTree { root },
        })
    }

    /// `levels` counts the relation itself; each referenced userset is
    /// expanded into leaf children while more than one level remains.
    fn expand_relation<'a>(
        &'a self,
        ctx: ResolutionContext,
        object: ObjectRef,
        relation: String,
        levels: u32,
    ) -> BoxFuture<'a, DomainResult<ExpandNode>> {
        Box::pin(async move {
            let name = format!("{object}#{relation}");
            let Some(ctx) = ctx.with_visited(&name) else {
                trace!(key = %name, "cycle detected, expanding to an empty leaf");
                return Ok(ExpandNode::Leaf(ExpandLeaf {
                    name,
                    value: ExpandLeafValue::Users(Vec::new()),
                    children: Vec::new(),
                }));
            };
            let ctx = ctx.descend()?;

            let model = Arc::clone(&ctx.model);
            let relation_def = model.get_relation(&object.object_type, &relation)?;
            self.expand_userset(&ctx, &object, relation_def, &relation_def.rewrite, &name, levels)
                .await
        })
    }

    fn expand_userset<'a>(
        &'a self,
        ctx: &'a ResolutionContext,
        object: &'a ObjectRef,
        relation_def: &'a RelationDefinition,
        userset: &'a Userset,
        name: &'a str,
        levels: u32,
    ) -> BoxFuture<'a, DomainResult<ExpandNode>> {
        Box::pin(async move {
            let leaf = |value: ExpandLeafValue, children: Vec<ExpandNode>| {
                ExpandNode::Leaf(ExpandLeaf {
                    name: name.to_string(),
                    value,
                    children,
                })
            };

            match userset {
                Userset::This => {
                    let tuples = self
                        .read_all_object_tuples(ctx, object, &relation_def.name)
                        .await?;
                    let references: Vec<(ObjectRef, String)> = tuples
                        .iter()
                        .filter_map(|t| {
                            let relation = t.user_relation.clone()?;
                            Some((ObjectRef::new(&t.user_type, &t.user_id), relation))
                        })
                        .collect();
                    let users = tuples.iter().map(|t| t.to_user_ref().to_string()).collect();
                    let children = self.expand_children(ctx, references, levels).await?;
                    Ok(leaf(ExpandLeafValue::Users(users), children))
                }
                Userset::ComputedUserset { relation } => {
                    let children = self
                        .expand_children(ctx, vec![(object.clone(), relation.clone())], levels)
                        .await?;
                    Ok(leaf(
                        ExpandLeafValue::Computed {
                            userset: format!("{object}#{relation}"),
                        },
                        children,
                    ))
                }
                Userset::TupleToUserset {
                    tupleset,
                    computed_userset,
                } => {
                    let parents: Vec<(ObjectRef, String)> = self
                        .read_all_object_tuples(ctx, object, tupleset)
                        .await?
                        .into_iter()
                        .filter(|p| {
                            p.user_relation.is_none()
                                && !p.is_wildcard()
                                && ctx.model.has_relation(&p.user_type, computed_userset)
                        })
                        .map(|p| (ObjectRef::new(p.user_type, p.user_id), computed_userset.clone()))
                        .collect();
                    let computed = parents
                        .iter()
                        .map(|(parent, relation)| format!("{parent}#{relation}"))
                        .collect();
                    let children = self.expand_children(ctx, parents, levels).await?;
                    Ok(leaf(
                        ExpandLeafValue::TupleToUserset {
                            tupleset: format!("{object}#{tupleset}"),
                            computed,
                        },
                        children,
                    ))
                }
                Userset::Union { children } => Ok(ExpandNode::Union {
                    name: name.to_string(),
                    nodes: self
                        .expand_all(ctx, object, relation_def, children, name, levels)
                        .await?,
                }),
                Userset::Intersection { children } => Ok(ExpandNode::Intersection {
                    name: name.to_string(),
                    nodes: self
                        .expand_all(ctx, object, relation_def, children, name, levels)
                        .await?,
                }),
                Userset::Exclusion { base, subtract } => {
                    let (base, subtract) = futures::future::try_join(
                        self.expand_userset(ctx, object, relation_def, base, name, levels),
                        self.expand_userset(ctx, object, relation_def, subtract, name, levels),
                    )
                    .await?;
                    Ok(ExpandNode::Difference {
                        name: name.to_string(),
                        base: Box::new(base),
                        subtract: Box::new(subtract),
                    })
                }
            }
        })
    }

    /// Rewrite children, in order.
    async fn expand_all(
        &self,
        ctx: &ResolutionContext,
        object: &ObjectRef,
        relation_def: &RelationDefinition,
        children: &[Userset],
        name: &str,
        levels: u32,
    ) -> DomainResult<Vec<ExpandNode>> {
        let nodes: Vec<_> = children
            .iter()
            .map(|child| self.expand_userset(ctx, object, relation_def, child, name, levels))
            .collect();
        stream::iter(nodes)
            .buffered(self.config.max_breadth.max(1))
            .try_collect()
            .await
    }

    /// Referenced usersets one level down, in order. Nothing when this is
    /// the last requested level.
    async fn expand_children(
        &self,
        ctx: &ResolutionContext,
        references: Vec<(ObjectRef, String)>,
        levels: u32,
    ) -> DomainResult<Vec<ExpandNode>> {
        if levels <= 1 {
            return Ok(Vec::new());
        }
        let nodes: Vec<_> = references
            .into_iter()
            .map(|(object, relation)| self.expand_relation(ctx.clone(), object, relation, levels - 1))
            .collect();
        stream::iter(nodes)
            .buffered(self.config.max_breadth.max(1))
            .try_collect()
            .await
    }
}
