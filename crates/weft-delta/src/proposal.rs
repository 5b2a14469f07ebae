//! Requests accepted by the delta engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_types::{Actor, Delta, DeltaId, DeltaOperation, Object, ObjectId, ObjectMetadata, OwnerId};

/// A structured change to the current payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UpdateRequest {
    Replace { payload: Vec<u8> },
    Append { bytes: Vec<u8> },
    Splice {
        offset: u64,
        delete: u64,
        insert: Vec<u8>,
    },
    SetPath { pointer: String, value: Value },
    RemovePath { pointer: String },
}

/// What a caller (or transform) wants to happen to an existing object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ChangeRequest {
    Update(UpdateRequest),
    /// Wholesale rewrite by an external transform.
    Transform {
        transform: String,
        payload: Vec<u8>,
        content_type: Option<String>,
    },
    Delete,
    Revert { target_version: u64 },
}

impl ChangeRequest {
    pub fn operation(&self) -> DeltaOperation {
        match self {
            Self::Update(_) => DeltaOperation::Update,
            Self::Transform { .. } => DeltaOperation::Transform,
            Self::Delete => DeltaOperation::Delete,
            Self::Revert { .. } => DeltaOperation::Revert,
        }
    }
}

/// A change plus who asked for it and what it was built against.
#[derive(Clone, Debug, PartialEq)]
pub struct DeltaProposal {
    pub change: ChangeRequest,
    pub actor: Actor,
    pub caused_by: Option<DeltaId>,
    /// Pin the version the change was derived from. A pinned proposal is
    /// never retried automatically.
    pub expected_version: Option<u64>,
}

impl DeltaProposal {
    pub fn new(change: ChangeRequest, actor: Actor) -> Self {
        Self {
            change,
            actor,
            caused_by: None,
            expected_version: None,
        }
    }

    pub fn caused_by(mut self, cause: DeltaId) -> Self {
        self.caused_by = Some(cause);
        self
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Everything needed to create an object.
#[derive(Clone, Debug, PartialEq)]
pub struct NewObject {
    pub owner_id: OwnerId,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub parent_id: Option<ObjectId>,
    pub metadata: ObjectMetadata,
    pub created_by: Actor,
    pub caused_by: Option<DeltaId>,
}

impl NewObject {
    /// A root object created by its owner.
    pub fn new(owner_id: OwnerId, payload: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            created_by: Actor::User(owner_id.clone()),
            owner_id,
            payload: payload.into(),
            content_type: content_type.into(),
            parent_id: None,
            metadata: ObjectMetadata::default(),
            caused_by: None,
        }
    }

    pub fn with_parent(mut self, parent: ObjectId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn with_metadata(mut self, metadata: ObjectMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn created_by(mut self, actor: Actor) -> Self {
        self.created_by = actor;
        self
    }

    pub fn caused_by(mut self, cause: Option<DeltaId>) -> Self {
        self.caused_by = cause;
        self
    }
}

/// A committed change: the object after it and the applied delta.
#[derive(Clone, Debug, PartialEq)]
pub struct Applied {
    pub object: Object,
    pub delta: Delta,
}
