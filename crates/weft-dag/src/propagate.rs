//! Level-by-level propagation of a change to derived descendants.
//!
//! Descendants of the origin are processed one DAG level at a time. All
//! nodes of a level run concurrently, bounded by a semaphore, and the next
//! level only starts once every task of the current one has finished. A
//! node re-runs the transform that created it on its parent's freshly
//! committed content and records the output as a `Transform` delta caused
//! by the parent's triggering delta.
//!
//! A node that fails, times out or names an unknown transform is marked
//! `processing_failed` and its subtree is skipped; its siblings continue.
//! Cancellation is observed between levels only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use weft_delta::{Applied, ChangeRequest, DeltaEngine, DeltaProposal};
use weft_types::{Actor, DeltaId, Object, ObjectId};

use crate::cache::DagCache;
use crate::cancel::{CancellationReason, CancellationToken};
use crate::error::DagResult;
use crate::transform::{TransformInput, TransformRegistry};

/// Tuning for a [`Propagator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropagationConfig {
    /// Nodes of one level processed at the same time.
    pub max_concurrency: usize,
    /// Upper bound on a single transform run.
    pub node_timeout: Duration,
    /// Attempts per node when a concurrent writer bumps its version.
    pub conflict_retries: u32,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            node_timeout: Duration::from_secs(30),
            conflict_retries: 5,
        }
    }
}

/// Hooks called as nodes settle.
pub trait PropagationObserver: Send + Sync {
    fn node_updated(&self, _applied: &Applied, _cause: &DeltaId) {}

    fn node_failed(&self, _object_id: &ObjectId, _reason: &str, _cause: &DeltaId) {}
}

/// Why a node was left alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The parent failed, was skipped, or produced no new state.
    ParentNotUpdated,
    /// Created by a user, so there is no transform to re-run.
    UserCreated,
    Tombstoned,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeOutcome {
    Updated { delta_id: DeltaId, version: u64 },
    Failed { reason: String },
    Skipped { reason: SkipReason },
}

impl NodeOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeReport {
    pub object_id: ObjectId,
    pub level: u32,
    pub outcome: NodeOutcome,
    /// Set for nodes that were dispatched.
    pub started: Option<Instant>,
    pub finished: Option<Instant>,
}

#[derive(Clone, Debug)]
pub struct LevelReport {
    pub level: u32,
    pub dispatched: usize,
    pub started: Instant,
    /// When the last task of the level completed.
    pub finished: Instant,
}

/// What one propagation run did.
#[derive(Clone, Debug)]
pub struct PropagationReport {
    pub origin: ObjectId,
    pub cause: DeltaId,
    pub nodes: Vec<NodeReport>,
    pub levels: Vec<LevelReport>,
    pub cancelled: Option<CancellationReason>,
}

impl PropagationReport {
    fn new(origin: ObjectId, cause: DeltaId) -> Self {
        Self {
            origin,
            cause,
            nodes: Vec::new(),
            levels: Vec::new(),
            cancelled: None,
        }
    }

    pub fn outcome(&self, id: &ObjectId) -> Option<&NodeOutcome> {
        self.nodes
            .iter()
            .find(|n| n.object_id == *id)
            .map(|n| &n.outcome)
    }

    pub fn node(&self, id: &ObjectId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.object_id == *id)
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Updated { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Skipped { .. }))
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.is_some()
    }

    fn count(&self, pred: impl Fn(&NodeOutcome) -> bool) -> usize {
        self.nodes.iter().filter(|n| pred(&n.outcome)).count()
    }
}

/// Runs propagation for object families.
#[derive(Clone)]
pub struct Propagator {
    engine: Arc<DeltaEngine>,
    transforms: Arc<TransformRegistry>,
    cache: Arc<DagCache>,
    config: PropagationConfig,
    observer: Option<Arc<dyn PropagationObserver>>,
}

impl Propagator {
    pub fn new(
        engine: Arc<DeltaEngine>,
        transforms: Arc<TransformRegistry>,
        cache: Arc<DagCache>,
        config: PropagationConfig,
    ) -> Self {
        Self {
            engine,
            transforms,
            cache,
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PropagationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Propagate the change `cause` made to `origin` through its descendants.
    pub async fn propagate(
        &self,
        origin: ObjectId,
        cause: DeltaId,
        token: CancellationToken,
    ) -> DagResult<PropagationReport> {
        let repo = self.engine.repo();
        let origin_object = repo.get(&origin, None)?;
        let view = self.cache.get_or_build(repo.as_ref(), &origin_object.root_id)?;
        let levels = view.descendants_by_level(&origin)?;
        info!(
            origin = %origin,
            cause = %cause,
            levels = levels.len(),
            "propagation started"
        );

        let mut report = PropagationReport::new(origin, cause);
        // Nodes that produced new state, with the delta that did it.
        let mut updated: HashMap<ObjectId, DeltaId> = HashMap::new();
        if !origin_object.is_tombstoned() {
            updated.insert(origin, cause);
        }
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        for (index, ids) in levels.iter().enumerate() {
            let level = origin_object.depth + 1 + index as u32;
            if token.is_cancelled() {
                let reason = token.reason().unwrap_or(CancellationReason::Requested);
                info!(origin = %origin, level, %reason, "propagation cancelled");
                for id in levels[index..].iter().flatten() {
                    report.nodes.push(NodeReport {
                        object_id: *id,
                        level: view.level(id).unwrap_or(level),
                        outcome: NodeOutcome::skipped(SkipReason::Cancelled),
                        started: None,
                        finished: None,
                    });
                }
                report.cancelled = Some(reason);
                break;
            }

            let started = Instant::now();
            let mut handles = Vec::with_capacity(ids.len());
            for id in ids {
                let parent_cause = view
                    .node(id)
                    .and_then(|n| n.parent_id)
                    .and_then(|parent| updated.get(&parent).map(|cause| (parent, *cause)));
                let Some((parent_id, parent_cause)) = parent_cause else {
                    report.nodes.push(NodeReport {
                        object_id: *id,
                        level,
                        outcome: NodeOutcome::skipped(SkipReason::ParentNotUpdated),
                        started: None,
                        finished: None,
                    });
                    continue;
                };

                let this = self.clone();
                let semaphore = Arc::clone(&semaphore);
                let node_id = *id;
                handles.push((
                    node_id,
                    parent_cause,
                    tokio::spawn(async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            let now = Instant::now();
                            return (NodeOutcome::failed("concurrency limiter closed"), now, now);
                        };
                        let started = Instant::now();
                        let outcome = this.process_node(node_id, parent_id, parent_cause).await;
                        (outcome, started, Instant::now())
                    }),
                ));
            }

            let dispatched = handles.len();
            for (node_id, parent_cause, handle) in handles {
                let (outcome, node_started, node_finished) = match handle.await {
                    Ok(result) => result,
                    Err(err) => {
                        let now = Instant::now();
                        let outcome = self.fail(&node_id, format!("task aborted: {err}"), &parent_cause);
                        (outcome, now, now)
                    }
                };
                if let NodeOutcome::Updated { delta_id, .. } = &outcome {
                    updated.insert(node_id, *delta_id);
                }
                report.nodes.push(NodeReport {
                    object_id: node_id,
                    level,
                    outcome,
                    started: Some(node_started),
                    finished: Some(node_finished),
                });
            }

            let finished = Instant::now();
            debug!(
                origin = %origin,
                level,
                dispatched,
                elapsed_ms = finished.duration_since(started).as_millis() as u64,
                "propagation level complete"
            );
            report.levels.push(LevelReport {
                level,
                dispatched,
                started,
                finished,
            });
        }

        info!(
            origin = %origin,
            updated = report.updated(),
            failed = report.failed(),
            skipped = report.skipped(),
            "propagation finished"
        );
        Ok(report)
    }

    async fn process_node(
        &self,
        node_id: ObjectId,
        parent_id: ObjectId,
        cause: DeltaId,
    ) -> NodeOutcome {
        let repo = self.engine.repo();
        let object = match repo.get(&node_id, None) {
            Ok(object) => object,
            Err(err) => return NodeOutcome::failed(err.to_string()),
        };
        if object.is_tombstoned() {
            return NodeOutcome::skipped(SkipReason::Tombstoned);
        }
        let Some(name) = object.created_by.transform_name().map(str::to_string) else {
            return NodeOutcome::skipped(SkipReason::UserCreated);
        };
        let Some(transform) = self.transforms.get(&name) else {
            return self.fail(&node_id, format!("unknown transform `{name}`"), &cause);
        };

        let parent = match repo.get(&parent_id, None) {
            Ok(parent) => parent,
            Err(err) => return self.fail(&node_id, err.to_string(), &cause),
        };
        let payload = match self.engine.content().get(&parent.content_ref) {
            Ok(payload) => payload,
            Err(err) => return self.fail(&node_id, err.to_string(), &cause),
        };
        let input = TransformInput {
            object_id: node_id,
            owner_id: object.owner_id.clone(),
            parent_id,
            parent_version: parent.version,
            payload,
            content_type: parent.content_type.clone(),
            cause,
        };

        let output = match tokio::time::timeout(self.config.node_timeout, transform.run(input)).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return self.fail(&node_id, err.to_string(), &cause),
            Err(_) => {
                let reason = format!(
                    "transform `{name}` timed out after {}ms",
                    self.config.node_timeout.as_millis()
                );
                return self.fail(&node_id, reason, &cause);
            }
        };

        let proposal = DeltaProposal::new(
            ChangeRequest::Transform {
                transform: name.clone(),
                payload: output.payload,
                content_type: output.content_type,
            },
            Actor::Transform(name),
        )
        .caused_by(cause);
        let mut applied = match self
            .engine
            .apply_with_retry(&node_id, &proposal, self.config.conflict_retries)
        {
            Ok(applied) => applied,
            Err(err) => return self.fail(&node_id, err.to_string(), &cause),
        };

        applied.object = self.record_source(applied.object, parent.version);
        if let Some(observer) = &self.observer {
            observer.node_updated(&applied, &cause);
        }
        NodeOutcome::Updated {
            delta_id: applied.delta.id,
            version: applied.object.version,
        }
    }

    fn record_source(&self, object: Object, parent_version: u64) -> Object {
        match self.engine.mark_derived(&object.id, parent_version) {
            Ok(updated) => updated,
            Err(err) => {
                warn!(object = %object.id, error = %err, "could not update derived metadata");
                object
            }
        }
    }

    fn fail(&self, node_id: &ObjectId, reason: String, cause: &DeltaId) -> NodeOutcome {
        warn!(object = %node_id, cause = %cause, %reason, "propagation failed on node");
        if let Err(err) = self
            .engine
            .set_processing_failure(node_id, Some((reason.clone(), Some(*cause))))
        {
            warn!(object = %node_id, error = %err, "could not mark node as failed");
        }
        if let Some(observer) = &self.observer {
            observer.node_failed(node_id, &reason, cause);
        }
        NodeOutcome::failed(reason)
    }
}

impl std::fmt::Debug for Propagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Propagator")
            .field("config", &self.config)
            .field("transforms", &self.transforms)
            .finish()
    }
}
