//! Delta records: the replayable state transitions of an object.
//!
//! Deltas for one object form a strict, gapless chain: delta *k* has
//! `from_version = k - 1` and `to_version = k`. A [`Patch`] is
//! self-describing: replaying it needs nothing but the patch itself and the
//! content store, so materialization never depends on wall-clock time or
//! any other state outside the chain.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::ContentHash;
use crate::id::{Actor, DeltaId, ObjectId};

/// A reference to a payload in the content store plus its descriptive fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub hash: ContentHash,
    pub size: u64,
    pub content_type: String,
}

/// The kind of state transition a delta records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOperation {
    Create,
    Update,
    Transform,
    Delete,
    Revert,
}

impl fmt::Display for DeltaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Transform => "transform",
            Self::Delete => "delete",
            Self::Revert => "revert",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a delta record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaStatus {
    Pending,
    Applied,
    Failed,
}

/// A structured modification of the current payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UpdatePatch {
    /// Replace the whole payload with stored content.
    Replace { content: ContentHash },
    /// Append bytes to the end of the payload.
    Append { bytes: Vec<u8> },
    /// Remove `delete` bytes at `offset` and insert `insert` in their place.
    Splice {
        offset: u64,
        delete: u64,
        insert: Vec<u8>,
    },
    /// Set the value at an RFC 6901 JSON pointer in a JSON payload.
    SetPath { pointer: String, value: Value },
    /// Remove the value at an RFC 6901 JSON pointer in a JSON payload.
    RemovePath { pointer: String },
}

/// The operation-specific payload of a delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Patch {
    Create {
        content: ContentHash,
        content_type: String,
    },
    Update(UpdatePatch),
    Transform {
        transform: String,
        content: ContentHash,
        content_type: Option<String>,
    },
    Delete,
    /// `content` and `content_type` are the target version's, resolved once
    /// when the revert was proposed.
    Revert {
        target_version: u64,
        content: ContentHash,
        content_type: String,
    },
}

impl Patch {
    pub fn operation(&self) -> DeltaOperation {
        match self {
            Self::Create { .. } => DeltaOperation::Create,
            Self::Update(_) => DeltaOperation::Update,
            Self::Transform { .. } => DeltaOperation::Transform,
            Self::Delete => DeltaOperation::Delete,
            Self::Revert { .. } => DeltaOperation::Revert,
        }
    }
}

/// A single recorded state transition for one object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub id: DeltaId,
    pub object_id: ObjectId,
    operation: DeltaOperation,
    patch: Patch,
    pub from_version: u64,
    pub to_version: u64,
    /// The delta on a different object that triggered this one.
    pub caused_by: Option<DeltaId>,
    pub actor: Actor,
    pub status: DeltaStatus,
    /// Content after this delta is applied; `None` for deletes.
    pub result: Option<ContentRef>,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
}

impl Delta {
    /// Build a pending delta moving `object_id` from `from_version` to the
    /// next version. The operation is always derived from the patch.
    pub fn new(
        object_id: ObjectId,
        from_version: u64,
        patch: Patch,
        actor: Actor,
        result: Option<ContentRef>,
    ) -> Self {
        Self {
            id: DeltaId::new(),
            object_id,
            operation: patch.operation(),
            patch,
            from_version,
            to_version: from_version + 1,
            caused_by: None,
            actor,
            status: DeltaStatus::Pending,
            result,
            created_at: Utc::now(),
            applied_at: None,
            failure: None,
        }
    }

    pub fn caused_by(mut self, cause: Option<DeltaId>) -> Self {
        self.caused_by = cause;
        self
    }

    pub fn operation(&self) -> DeltaOperation {
        self.operation
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    pub fn is_applied(&self) -> bool {
        self.status == DeltaStatus::Applied
    }

    /// Mark the delta applied. Applied deltas are immutable afterwards.
    pub fn mark_applied(&mut self) {
        self.status = DeltaStatus::Applied;
        self.applied_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = DeltaStatus::Failed;
        self.failure = Some(reason.into());
    }

    /// Content hashes this delta holds a reference on once applied.
    pub fn held_content(&self) -> Option<ContentHash> {
        self.result.as_ref().map(|r| r.hash)
    }
}

/// A materialized snapshot of an object at a version, used to shorten
/// replay. Checkpoints never replace the delta chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub object_id: ObjectId,
    pub version: u64,
    pub content: Option<ContentRef>,
    pub tombstoned: bool,
}
