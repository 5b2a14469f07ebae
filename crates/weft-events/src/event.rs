use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weft_crypto::ContentHasher;
use weft_types::{ContentHash, DeltaId, ObjectId, OwnerId};

use crate::error::{EventError, EventResult};
use crate::subject::Subject;

/// Subject of inbound transform completions.
pub const TRANSFORM_COMPLETED: &str = "transform.completed";
/// Subject of inbound transform failures.
pub const TRANSFORM_FAILED: &str = "transform.failed";

/// Content-derived identifier of a [`StoreEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(ContentHash);

impl EventId {
    pub fn hash(&self) -> &ContentHash {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt:{}", self.0.short_hex())
    }
}

/// What happened to an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification that an object changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEvent {
    pub id: EventId,
    pub event_type: EventType,
    pub object_id: ObjectId,
    pub owner_id: OwnerId,
    pub root_id: ObjectId,
    /// The delta that produced this state.
    pub delta_id: DeltaId,
    /// Object version after the change.
    pub version: u64,
    /// Upstream delta when the change came from propagation.
    pub caused_by: Option<DeltaId>,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct IdFields<'a> {
    event_type: EventType,
    object_id: &'a ObjectId,
    owner_id: &'a OwnerId,
    delta_id: &'a DeltaId,
    version: u64,
}

impl StoreEvent {
    /// Build an event, deriving its id from the fields that identify the
    /// change. The same delta always yields the same id.
    pub fn new(
        event_type: EventType,
        object_id: ObjectId,
        owner_id: OwnerId,
        root_id: ObjectId,
        delta_id: DeltaId,
        version: u64,
    ) -> EventResult<Self> {
        let fields = IdFields {
            event_type,
            object_id: &object_id,
            owner_id: &owner_id,
            delta_id: &delta_id,
            version,
        };
        let bytes =
            bincode::serialize(&fields).map_err(|e| EventError::Serialization(e.to_string()))?;
        Ok(Self {
            id: EventId(ContentHasher::EVENT.hash(&bytes)),
            event_type,
            object_id,
            owner_id,
            root_id,
            delta_id,
            version,
            caused_by: None,
            emitted_at: Utc::now(),
        })
    }

    pub fn caused_by(mut self, cause: Option<DeltaId>) -> Self {
        self.caused_by = cause;
        self
    }

    /// `objects.<owner>.<event_type>`
    pub fn subject(&self) -> Subject {
        Subject::from_tokens(&["objects", self.owner_id.as_str(), self.event_type.as_str()])
    }
}

/// Result reported back by an external transform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransformEvent {
    Completed {
        source_object_id: ObjectId,
        transform: String,
        output_payload: Vec<u8>,
        content_type: Option<String>,
    },
    Failed {
        source_object_id: ObjectId,
        transform: String,
        error: String,
    },
}

impl TransformEvent {
    pub fn source_object_id(&self) -> &ObjectId {
        match self {
            Self::Completed {
                source_object_id, ..
            }
            | Self::Failed {
                source_object_id, ..
            } => source_object_id,
        }
    }

    pub fn transform(&self) -> &str {
        match self {
            Self::Completed { transform, .. } | Self::Failed { transform, .. } => transform,
        }
    }

    pub fn subject(&self) -> Subject {
        match self {
            Self::Completed { .. } => Subject::from_tokens(&["transform", "completed"]),
            Self::Failed { .. } => Subject::from_tokens(&["transform", "failed"]),
        }
    }

    /// Decode a JSON message body received on `subject`. The body's status
    /// must agree with the subject.
    pub fn decode(subject: &Subject, body: &[u8]) -> EventResult<Self> {
        let event: Self = serde_json::from_slice(body).map_err(|e| EventError::Decode {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;
        if event.subject() != *subject {
            return Err(EventError::Decode {
                subject: subject.to_string(),
                reason: format!("body is a `{}` message", event.subject()),
            });
        }
        Ok(event)
    }

    pub fn encode(&self) -> EventResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| EventError::Serialization(e.to_string()))
    }
}
