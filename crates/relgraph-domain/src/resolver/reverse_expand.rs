//! ReverseExpand: every object of a type a user is related to.
//!
//! Starting from the user, facts of the form "user ∈ `type:id#relation`"
//! are derived by walking the model's reverse relation graph and issuing
//! reverse tuple scans, wave by wave, until nothing new is found. Facts for
//! the requested `(type, relation)` are streamed out as they are derived.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn, Instrument};

use crate::error::{DomainError, DomainResult};
use crate::model::{EdgeKind, ObjectRef, RelationEdge, UserRef};

use super::context::ResolutionContext;
use super::graph_resolver::GraphResolver;
use super::traits::{ModelReader, TupleReader};
use super::types::ListObjectsRequest;

const OBJECT_CHANNEL_CAPACITY: usize = 100;

/// "user ∈ `object_type:object_id#relation`", or the user itself when
/// `relation` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Fact {
    object_type: String,
    object_id: String,
    relation: Option<String>,
}

impl Fact {
    fn seed(user: &UserRef) -> Self {
        Self {
            object_type: user.user_type().to_string(),
            object_id: user.user_id().to_string(),
            relation: user.relation().map(str::to_string),
        }
    }

    fn object(&self) -> String {
        format!("{}:{}", self.object_type, self.object_id)
    }
}

#[derive(Debug)]
struct Candidate {
    fact: Fact,
    /// Derived through an intersection or exclusion base.
    conditional: bool,
}

/// Sends target facts to the consumer and enforces the result cap.
struct Emitter<'a> {
    tx: &'a mpsc::Sender<DomainResult<String>>,
    object_type: &'a str,
    relation: &'a str,
    /// Objects at or before this cursor are skipped and not counted.
    after: Option<&'a str>,
    emitted: usize,
    max_results: usize,
    truncated: &'a AtomicBool,
}

impl Emitter<'_> {
    /// Emits `fact` if it belongs to the target. `false` once the run
    /// should stop.
    async fn offer(&mut self, fact: &Fact) -> bool {
        if fact.object_type != self.object_type || fact.relation.as_deref() != Some(self.relation)
        {
            return true;
        }
        let object = fact.object();
        if self.after.is_some_and(|after| object.as_str() <= after) {
            return true;
        }
        if self.emitted >= self.max_results {
            self.truncated.store(true, Ordering::Release);
            return false;
        }
        if self.tx.send(Ok(object)).await.is_err() {
            // Consumer went away.
            return false;
        }
        self.emitted += 1;
        true
    }
}

/// Lazy stream of `type:id` objects from one ReverseExpand run.
///
/// The producer runs on its own task. Dropping the stream cancels it.
pub struct ObjectStream {
    receiver: mpsc::Receiver<DomainResult<String>>,
    truncated: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    model_id: Option<String>,
}

impl ObjectStream {
    /// Whether the run stopped early. Final once the stream has ended.
    pub fn truncated(&self) -> bool {
        self.truncated.load(Ordering::Acquire)
    }

    /// Stops the producer; the stream ends after what is already buffered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The model version the run is pinned to.
    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }
}

impl Stream for ObjectStream {
    type Item = DomainResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ObjectStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

impl<T, M> GraphResolver<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Starts a ReverseExpand run.
    ///
    /// The request is validated before the stream is returned. Paging fields
    /// are ignored; see [`list_objects`](Self::list_objects).
    #[instrument(
        skip(self, request),
        fields(store_id = %request.store_id, object_type = %request.object_type, relation = %request.relation, user = %request.user)
    )]
    pub async fn reverse_expand(
        self: &Arc<Self>,
        request: &ListObjectsRequest,
    ) -> DomainResult<ObjectStream> {
        self.reverse_expand_after(request, None).await
    }

    /// Starts a run that only emits objects ordered after `after`. Skipped
    /// objects do not count toward the result cap.
    pub(crate) async fn reverse_expand_after(
        self: &Arc<Self>,
        request: &ListObjectsRequest,
        after: Option<String>,
    ) -> DomainResult<ObjectStream> {
        let user = UserRef::parse(&request.user)?;
        if user.is_wildcard() {
            return Err(DomainError::InvalidParameter {
                parameter: "user".to_string(),
                reason: "objects cannot be listed for a wildcard".to_string(),
            });
        }

        let model = self
            .load_model(
                &request.store_id,
                request.authorization_model_id.as_deref(),
                request.consistency,
            )
            .await?;
        model.get_relation(&request.object_type, &request.relation)?;
        model.validate_user(&user)?;

        let model_id = model.id().map(str::to_string);
        let cancel = CancellationToken::new();
        let truncated = Arc::new(AtomicBool::new(false));
        let (tx, receiver) = mpsc::channel(OBJECT_CHANNEL_CAPACITY);
        let ctx = self.context(&request.store_id, model, cancel.clone());

        let resolver = Arc::clone(self);
        let target = (request.object_type.clone(), request.relation.clone());
        let flag = Arc::clone(&truncated);
        let task = tokio::spawn(
            async move { resolver.produce_objects(ctx, user, target, after, tx, flag).await }
                .in_current_span(),
        );

        Ok(ObjectStream {
            receiver,
            truncated,
            cancel,
            task,
            model_id,
        })
    }

    async fn produce_objects(
        self: Arc<Self>,
        ctx: ResolutionContext,
        user: UserRef,
        target: (String, String),
        after: Option<String>,
        tx: mpsc::Sender<DomainResult<String>>,
        truncated: Arc<AtomicBool>,
    ) {
        let deadline = self.config.list_objects_deadline;
        let mut emitter = Emitter {
            tx: &tx,
            object_type: &target.0,
            relation: &target.1,
            after: after.as_deref(),
            emitted: 0,
            max_results: self.config.list_objects_max_results,
            truncated: &truncated,
        };

        match tokio::time::timeout(deadline, self.expand_facts(&ctx, user, &mut emitter)).await {
            Ok(Ok(())) => {}
            Ok(Err(DomainError::Cancelled)) => {
                debug!("reverse expand cancelled");
                truncated.store(true, Ordering::Release);
            }
            Ok(Err(e)) => {
                // Nobody to tell if the consumer is gone.
                let _ = tx.send(Err(e)).await;
            }
            Err(_) => {
                debug!(
                    deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    "reverse expand deadline reached"
                );
                truncated.store(true, Ordering::Release);
            }
        }
    }

    async fn expand_facts(
        &self,
        ctx: &ResolutionContext,
        user: UserRef,
        emitter: &mut Emitter<'_>,
    ) -> DomainResult<()> {
        let breadth = self.config.max_breadth.max(1);
        let seed = Fact::seed(&user);
        let user = Arc::new(user);

        // A userset user is trivially a member of its own relation.
        if !emitter.offer(&seed).await {
            return Ok(());
        }

        let mut known = HashSet::from([seed.clone()]);
        let mut wave = vec![seed];
        while !wave.is_empty() {
            ctx.ensure_active()?;
            let mut next_wave = Vec::new();
            let mut conditional = Vec::new();

            {
                let expansions: Vec<_> =
                    wave.iter().map(|fact| self.successors(ctx, fact)).collect();
                let mut expansions = stream::iter(expansions).buffer_unordered(breadth);
                while let Some(candidates) = expansions.next().await {
                    for candidate in candidates? {
                        if !known.insert(candidate.fact.clone()) {
                            continue;
                        }
                        if candidate.conditional {
                            conditional.push(candidate.fact);
                            continue;
                        }
                        if !emitter.offer(&candidate.fact).await {
                            return Ok(());
                        }
                        next_wave.push(candidate.fact);
                    }
                }
            }

            let user = &user;
            let verifications: Vec<_> = conditional
                .into_iter()
                .map(|fact| async move {
                    let result = self.verify_fact(ctx, user, &fact).await;
                    (fact, result)
                })
                .collect();
            let mut verifications = stream::iter(verifications).buffer_unordered(breadth);
            while let Some((fact, result)) = verifications.next().await {
                match result {
                    Ok(true) => {
                        if !emitter.offer(&fact).await {
                            return Ok(());
                        }
                        next_wave.push(fact);
                    }
                    Ok(false) => {}
                    Err(DomainError::Cancelled) => return Err(DomainError::Cancelled),
                    Err(e) => {
                        warn!(object = %fact.object(), error = %e, "skipping unverifiable candidate");
                        emitter.truncated.store(true, Ordering::Release);
                    }
                }
            }

            wave = next_wave;
        }
        Ok(())
    }

    /// Facts one edge away from `fact`.
    async fn successors(&self, ctx: &ResolutionContext, fact: &Fact) -> DomainResult<Vec<Candidate>> {
        let edges = ctx
            .model
            .graph()
            .edges_from(&fact.object_type, fact.relation.as_deref());
        let reads: Vec<_> = edges
            .iter()
            .map(|edge| self.follow_edge(ctx, fact, edge))
            .collect();
        let per_edge: Vec<Vec<Candidate>> = stream::iter(reads)
            .buffer_unordered(self.config.max_breadth.max(1))
            .try_collect()
            .await?;
        Ok(per_edge.into_iter().flatten().collect())
    }

    async fn follow_edge(
        &self,
        ctx: &ResolutionContext,
        fact: &Fact,
        edge: &RelationEdge,
    ) -> DomainResult<Vec<Candidate>> {
        let candidate = |object_id: String| Candidate {
            fact: Fact {
                object_type: edge.target_type.clone(),
                object_id,
                relation: Some(edge.target_relation.clone()),
            },
            conditional: edge.conditional,
        };

        let (relation, user) = match (&edge.kind, &fact.relation) {
            (EdgeKind::Computed, Some(_)) => return Ok(vec![candidate(fact.object_id.clone())]),
            (EdgeKind::Direct, None) => (
                edge.target_relation.as_str(),
                UserRef::object(&fact.object_type, &fact.object_id),
            ),
            (EdgeKind::DirectWildcard, None) => (
                edge.target_relation.as_str(),
                UserRef::wildcard(&fact.object_type),
            ),
            (EdgeKind::Userset, Some(relation)) => (
                edge.target_relation.as_str(),
                UserRef::userset(&fact.object_type, &fact.object_id, relation),
            ),
            (EdgeKind::TupleToUserset { tupleset }, Some(_)) => (
                tupleset.as_str(),
                UserRef::object(&fact.object_type, &fact.object_id),
            ),
            _ => return Ok(Vec::new()),
        };

        let ids = self
            .read_all_objects_for_user(ctx, &edge.target_type, relation, &user)
            .await?;
        Ok(ids.into_iter().map(candidate).collect())
    }

    /// Full check of a fact reached through a conditional edge.
    async fn verify_fact(
        &self,
        ctx: &ResolutionContext,
        user: &Arc<UserRef>,
        fact: &Fact,
    ) -> DomainResult<bool> {
        let Some(relation) = &fact.relation else {
            return Ok(true);
        };
        self.resolve_check(
            ctx.fresh_branch(),
            ObjectRef::new(&fact.object_type, &fact.object_id),
            relation.clone(),
            Arc::clone(user),
        )
        .await
    }
}
