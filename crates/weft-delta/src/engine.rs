use std::fmt::Display;
use std::sync::Arc;

use tracing::{debug, info, warn};
use weft_content::ContentStore;
use weft_crypto::ContentHasher;
use weft_repo::{ObjectRepository, RepoError};
use weft_types::{
    Actor, Checkpoint, ContentHash, ContentRef, Delta, DeltaId, Object, ObjectId, Patch,
    ProcessingFailure, UpdatePatch,
};

use crate::config::DeltaConfig;
use crate::diff::{diff_payloads, VersionDiff};
use crate::error::{DeltaError, DeltaResult};
use crate::patch::{apply_patch, Materialized};
use crate::proposal::{Applied, ChangeRequest, DeltaProposal, NewObject, UpdateRequest};

/// Outcome of replaying an object's delta chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replay {
    pub object_id: ObjectId,
    pub state: Materialized,
    /// Deltas applied on top of the starting point.
    pub replayed: u64,
    /// Version of the checkpoint replay started from, if any.
    pub checkpoint: Option<u64>,
}

/// A patch ready to commit, plus the content reference taken for it.
struct Staged {
    patch: Patch,
    result: Option<ContentRef>,
    held: Option<ContentHash>,
}

impl Staged {
    fn holding(patch: Patch, result: ContentRef) -> Self {
        Self {
            held: Some(result.hash),
            result: Some(result),
            patch,
        }
    }
}

/// Validates, applies and replays deltas.
///
/// Each apply stores content first and commits to the repository second.
/// If the commit fails the content reference is released again and the
/// proposal is recorded as failed, so an applied delta always has its
/// content stored and a failed one never holds a reference.
pub struct DeltaEngine {
    content: Arc<dyn ContentStore>,
    repo: Arc<dyn ObjectRepository>,
    config: DeltaConfig,
}

impl DeltaEngine {
    pub fn new(
        content: Arc<dyn ContentStore>,
        repo: Arc<dyn ObjectRepository>,
        config: DeltaConfig,
    ) -> Self {
        Self {
            content,
            repo,
            config,
        }
    }

    pub fn content(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    pub fn repo(&self) -> &Arc<dyn ObjectRepository> {
        &self.repo
    }

    pub fn config(&self) -> &DeltaConfig {
        &self.config
    }

    /// Create an object from a payload, optionally derived from a parent.
    pub fn create(&self, request: &NewObject) -> DeltaResult<Applied> {
        self.check_size(request.payload.len())?;
        request.metadata.validate()?;

        let parent = match request.parent_id {
            Some(parent_id) => Some(self.repo.get(&parent_id, None).map_err(|e| match e {
                RepoError::ObjectNotFound(_) => RepoError::InvalidParent {
                    parent: parent_id,
                    reason: "parent does not exist".into(),
                },
                other => other,
            })?),
            None => None,
        };

        let hash = self.content.put(&request.payload)?;
        let content = ContentRef {
            hash,
            size: request.payload.len() as u64,
            content_type: request.content_type.clone(),
        };
        let mut metadata = request.metadata.clone();
        let object = match &parent {
            Some(parent) => {
                metadata.source_version.get_or_insert(parent.version);
                let mut child =
                    Object::new_child(parent, content.clone(), request.created_by.clone(), metadata);
                // The repository rejects a parent owned by someone else.
                child.owner_id = request.owner_id.clone();
                child
            }
            None => Object::new_root(
                request.owner_id.clone(),
                content.clone(),
                request.created_by.clone(),
                metadata,
            ),
        };
        let genesis = Delta::new(
            object.id,
            0,
            Patch::Create {
                content: hash,
                content_type: request.content_type.clone(),
            },
            request.created_by.clone(),
            Some(content),
        )
        .caused_by(request.caused_by);

        match self.repo.create(object, genesis.clone()) {
            Ok(object) => {
                let delta = self.repo.delta(&object.id, object.version)?;
                info!(
                    object = %object.id,
                    owner = %object.owner_id,
                    depth = object.depth,
                    content = %hash.short_hex(),
                    "object created"
                );
                Ok(Applied { object, delta })
            }
            Err(err) => {
                self.roll_back(Some(hash), genesis, &err);
                Err(err.into())
            }
        }
    }

    /// Apply one change to an existing object.
    ///
    /// Fails with a version conflict if another delta committed first.
    pub fn apply(&self, object_id: &ObjectId, proposal: &DeltaProposal) -> DeltaResult<Applied> {
        let object = self.repo.get(object_id, None)?;
        if object.is_tombstoned() {
            return Err(RepoError::ObjectTombstoned(*object_id).into());
        }
        if let Some(expected) = proposal.expected_version {
            if expected != object.version {
                return Err(RepoError::VersionConflict {
                    id: *object_id,
                    expected,
                    found: object.version,
                }
                .into());
            }
        }

        let staged = self.stage(&object, &proposal.change)?;
        let delta = Delta::new(
            object.id,
            object.version,
            staged.patch,
            proposal.actor.clone(),
            staged.result,
        )
        .caused_by(proposal.caused_by);

        match self.repo.append_delta(delta.clone()) {
            Ok(updated) => {
                let applied = self.repo.delta(object_id, updated.version)?;
                debug!(
                    object = %object_id,
                    version = updated.version,
                    operation = %applied.operation(),
                    "delta committed"
                );
                self.maybe_checkpoint(&updated);
                Ok(Applied {
                    object: updated,
                    delta: applied,
                })
            }
            Err(err) => {
                self.roll_back(staged.held, delta, &err);
                Err(err.into())
            }
        }
    }

    /// [`apply`](Self::apply), re-reading and re-deriving after a version
    /// conflict up to `max_attempts` times. Proposals pinned to an expected
    /// version are never retried.
    pub fn apply_with_retry(
        &self,
        object_id: &ObjectId,
        proposal: &DeltaProposal,
        max_attempts: u32,
    ) -> DeltaResult<Applied> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.apply(object_id, proposal) {
                Err(err)
                    if err.is_version_conflict()
                        && proposal.expected_version.is_none()
                        && attempt < max_attempts =>
                {
                    debug!(object = %object_id, attempt, "retrying after version conflict");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Append a delta restoring the content of `target_version`.
    pub fn revert(
        &self,
        object_id: &ObjectId,
        target_version: u64,
        actor: Actor,
    ) -> DeltaResult<Applied> {
        let proposal = DeltaProposal::new(ChangeRequest::Revert { target_version }, actor);
        self.apply(object_id, &proposal)
    }

    /// Materialize `version` (latest if `None`), starting from the nearest
    /// checkpoint when one exists.
    pub fn materialize(&self, object_id: &ObjectId, version: Option<u64>) -> DeltaResult<Replay> {
        self.replay(object_id, version, true)
    }

    /// Materialize by replaying every delta from the create.
    pub fn replay_from_genesis(
        &self,
        object_id: &ObjectId,
        version: Option<u64>,
    ) -> DeltaResult<Replay> {
        self.replay(object_id, version, false)
    }

    /// Checkpointed and full replay must agree on the latest state.
    pub fn verify_checkpoint_convergence(&self, object_id: &ObjectId) -> DeltaResult<bool> {
        let fast = self.materialize(object_id, None)?;
        let full = self.replay_from_genesis(object_id, None)?;
        Ok(fast.state == full.state)
    }

    /// Line diff between two versions of an object.
    pub fn diff_versions(&self, object_id: &ObjectId, from: u64, to: u64) -> DeltaResult<VersionDiff> {
        let old = self.repo.get(object_id, Some(from))?;
        let new = self.repo.get(object_id, Some(to))?;
        let old_payload = self.content.get(&old.content_ref)?;
        let new_payload = self.content.get(&new.content_ref)?;
        Ok(diff_payloads(from, &old_payload, to, &new_payload))
    }

    /// Set or clear the `processing_failed` annotation without a new version.
    pub fn set_processing_failure(
        &self,
        object_id: &ObjectId,
        failure: Option<(String, Option<DeltaId>)>,
    ) -> DeltaResult<Object> {
        let object = self.repo.get(object_id, None)?;
        let mut metadata = object.metadata;
        metadata.processing_failed =
            failure.map(|(reason, delta_id)| ProcessingFailure { reason, delta_id });
        Ok(self.repo.set_metadata(object_id, metadata)?)
    }

    /// Record that `object_id` now reflects `source_version` of its parent,
    /// clearing any earlier processing failure.
    pub fn mark_derived(&self, object_id: &ObjectId, source_version: u64) -> DeltaResult<Object> {
        let object = self.repo.get(object_id, None)?;
        if object.metadata.processing_failed.is_none()
            && object.metadata.source_version == Some(source_version)
        {
            return Ok(object);
        }
        let mut metadata = object.metadata;
        metadata.processing_failed = None;
        metadata.source_version = Some(source_version);
        Ok(self.repo.set_metadata(object_id, metadata)?)
    }

    fn check_size(&self, size: usize) -> DeltaResult<()> {
        let size = size as u64;
        if size > self.config.max_payload_bytes {
            return Err(DeltaError::PayloadTooLarge {
                size,
                max: self.config.max_payload_bytes,
            });
        }
        Ok(())
    }

    fn current_state(&self, object: &Object) -> DeltaResult<Materialized> {
        Ok(Materialized {
            version: object.version,
            payload: self.content.get(&object.content_ref)?,
            content_type: object.content_type.clone(),
            tombstoned: object.is_tombstoned(),
        })
    }

    /// Resolve a request into a self-contained patch, storing any new
    /// content. Nothing here depends on the clock.
    fn stage(&self, object: &Object, change: &ChangeRequest) -> DeltaResult<Staged> {
        match change {
            ChangeRequest::Update(UpdateRequest::Replace { payload }) => {
                self.check_size(payload.len())?;
                let hash = self.content.put(payload)?;
                Ok(Staged::holding(
                    Patch::Update(UpdatePatch::Replace { content: hash }),
                    ContentRef {
                        hash,
                        size: payload.len() as u64,
                        content_type: object.content_type.clone(),
                    },
                ))
            }
            ChangeRequest::Update(UpdateRequest::Append { bytes }) => self.stage_derived(
                object,
                UpdatePatch::Append {
                    bytes: bytes.clone(),
                },
            ),
            ChangeRequest::Update(UpdateRequest::Splice {
                offset,
                delete,
                insert,
            }) => self.stage_derived(
                object,
                UpdatePatch::Splice {
                    offset: *offset,
                    delete: *delete,
                    insert: insert.clone(),
                },
            ),
            ChangeRequest::Update(UpdateRequest::SetPath { pointer, value }) => self.stage_derived(
                object,
                UpdatePatch::SetPath {
                    pointer: pointer.clone(),
                    value: value.clone(),
                },
            ),
            ChangeRequest::Update(UpdateRequest::RemovePath { pointer }) => self.stage_derived(
                object,
                UpdatePatch::RemovePath {
                    pointer: pointer.clone(),
                },
            ),
            ChangeRequest::Transform {
                transform,
                payload,
                content_type,
            } => {
                self.check_size(payload.len())?;
                let hash = self.content.put(payload)?;
                Ok(Staged::holding(
                    Patch::Transform {
                        transform: transform.clone(),
                        content: hash,
                        content_type: content_type.clone(),
                    },
                    ContentRef {
                        hash,
                        size: payload.len() as u64,
                        content_type: content_type
                            .clone()
                            .unwrap_or_else(|| object.content_type.clone()),
                    },
                ))
            }
            ChangeRequest::Delete => Ok(Staged {
                patch: Patch::Delete,
                result: None,
                held: None,
            }),
            ChangeRequest::Revert { target_version } => {
                let target_version = *target_version;
                if target_version == 0 || target_version >= object.version {
                    return Err(DeltaError::InvalidOperation(format!(
                        "cannot revert {} at version {} to version {target_version}",
                        object.id, object.version
                    )));
                }
                let target = self.repo.get(&object.id, Some(target_version))?;
                self.content.retain(&target.content_ref)?;
                Ok(Staged::holding(
                    Patch::Revert {
                        target_version,
                        content: target.content_ref,
                        content_type: target.content_type.clone(),
                    },
                    target.content(),
                ))
            }
        }
    }

    /// Stage a patch whose result is computed from the current payload.
    fn stage_derived(&self, object: &Object, update: UpdatePatch) -> DeltaResult<Staged> {
        let patch = Patch::Update(update);
        let current = self.current_state(object)?;
        let next = apply_patch(&current, &patch, |h| Ok(self.content.get(h)?))?;
        self.check_size(next.payload.len())?;
        let hash = self.content.put(&next.payload)?;
        Ok(Staged::holding(
            patch,
            ContentRef {
                hash,
                size: next.payload.len() as u64,
                content_type: next.content_type,
            },
        ))
    }

    fn roll_back(&self, held: Option<ContentHash>, mut delta: Delta, reason: &dyn Display) {
        if let Some(hash) = held {
            if let Err(err) = self.content.release(&hash) {
                warn!(content = %hash.short_hex(), %err, "failed to release content after rollback");
            }
        }
        debug!(
            object = %delta.object_id,
            from = delta.from_version,
            operation = %delta.operation(),
            %reason,
            "delta rolled back"
        );
        delta.mark_failed(reason.to_string());
        if let Err(err) = self.repo.record_failed(delta) {
            warn!(%err, "failed to record rejected delta");
        }
    }

    fn maybe_checkpoint(&self, object: &Object) {
        if !self.config.should_checkpoint(object.version) {
            return;
        }
        let content = object.content();
        if let Err(err) = self.content.retain(&content.hash) {
            warn!(object = %object.id, %err, "skipping checkpoint");
            return;
        }
        let checkpoint = Checkpoint {
            object_id: object.id,
            version: object.version,
            content: Some(content.clone()),
            tombstoned: object.is_tombstoned(),
        };
        match self.repo.put_checkpoint(checkpoint) {
            Ok(()) => debug!(object = %object.id, version = object.version, "checkpoint written"),
            Err(err) => {
                warn!(object = %object.id, %err, "failed to write checkpoint");
                if let Err(err) = self.content.release(&content.hash) {
                    warn!(%err, "failed to release checkpoint content");
                }
            }
        }
    }

    fn replay(
        &self,
        object_id: &ObjectId,
        version: Option<u64>,
        use_checkpoints: bool,
    ) -> DeltaResult<Replay> {
        let object = self.repo.get(object_id, None)?;
        let target = version.unwrap_or(object.version);
        let not_found = || RepoError::VersionNotFound {
            id: *object_id,
            version: target,
        };
        if target == 0 || target > object.version {
            return Err(not_found().into());
        }

        let checkpoint = if use_checkpoints {
            self.repo.latest_checkpoint(object_id, target)?
        } else {
            None
        };
        let mut state = match &checkpoint {
            Some(cp) => self.checkpoint_state(cp)?,
            None => Materialized::genesis(),
        };

        let deltas = self.repo.deltas(object_id, state.version, target)?;
        for delta in &deltas {
            state = apply_patch(&state, delta.patch(), |h| Ok(self.content.get(h)?))?;
            if let Some(recorded) = &delta.result {
                let computed = ContentHasher::CONTENT.hash(&state.payload);
                if computed != recorded.hash {
                    return Err(DeltaError::ReplayDivergence {
                        object: *object_id,
                        version: delta.to_version,
                        recorded: recorded.hash,
                        computed,
                    });
                }
            }
        }
        if state.version != target {
            return Err(not_found().into());
        }

        Ok(Replay {
            object_id: *object_id,
            state,
            replayed: deltas.len() as u64,
            checkpoint: checkpoint.map(|cp| cp.version),
        })
    }

    fn checkpoint_state(&self, checkpoint: &Checkpoint) -> DeltaResult<Materialized> {
        let (payload, content_type) = match &checkpoint.content {
            Some(content) => (self.content.get(&content.hash)?, content.content_type.clone()),
            None => (Vec::new(), String::new()),
        };
        Ok(Materialized {
            version: checkpoint.version,
            payload,
            content_type,
            tombstoned: checkpoint.tombstoned,
        })
    }
}

impl std::fmt::Debug for DeltaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
