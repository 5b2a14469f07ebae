use weft_content::ContentError;
use weft_dag::DagError;
use weft_delta::DeltaError;
use weft_events::EventError;
use weft_repo::RepoError;
use weft_types::{ObjectId, OwnerId, TypeError};

/// Errors surfaced by the [`Weft`](crate::Weft) façade.
///
/// Lower-layer errors are folded into this taxonomy so callers can decide
/// what to do without knowing which component failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WeftError {
    /// Object, version, delta or content absent (or owned by someone else).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid parent {parent}: {reason}")]
    InvalidParent { parent: ObjectId, reason: String },

    /// Optimistic concurrency loss. Re-read and retry.
    #[error("version conflict on {id}: expected {expected}, found {found}")]
    VersionConflict {
        id: ObjectId,
        expected: u64,
        found: u64,
    },

    #[error("object {0} is tombstoned")]
    ObjectTombstoned(ObjectId),

    #[error("quota exceeded for {owner}: {reason}")]
    QuotaExceeded { owner: OwnerId, reason: String },

    /// An external transform failed for one object.
    #[error("transform failed on {object}: {reason}")]
    TransformFailed { object: ObjectId, reason: String },

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Content corruption, I/O or replay divergence.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WeftError {
    /// Only version conflicts are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<RepoError> for WeftError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::ObjectNotFound(id) => Self::NotFound(format!("object {id}")),
            RepoError::VersionNotFound { id, version } => {
                Self::NotFound(format!("version {version} of {id}"))
            }
            RepoError::InvalidParent { parent, reason } => Self::InvalidParent { parent, reason },
            RepoError::VersionConflict {
                id,
                expected,
                found,
            } => Self::VersionConflict {
                id,
                expected,
                found,
            },
            RepoError::ObjectTombstoned(id) => Self::ObjectTombstoned(id),
            other @ (RepoError::HasChildren { .. }
            | RepoError::AlreadyExists(_)
            | RepoError::InvalidDelta(_)
            | RepoError::Type(_)) => Self::InvalidRequest(other.to_string()),
        }
    }
}

impl From<ContentError> for WeftError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::NotFound(hash) => Self::NotFound(format!("content {hash}")),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<DeltaError> for WeftError {
    fn from(err: DeltaError) -> Self {
        match err {
            DeltaError::Repo(e) => e.into(),
            DeltaError::Content(e) => e.into(),
            DeltaError::Type(e) => e.into(),
            DeltaError::PayloadTooLarge { size, max } => Self::PayloadTooLarge { size, max },
            DeltaError::InvalidPatch(msg) | DeltaError::InvalidOperation(msg) => {
                Self::InvalidRequest(msg)
            }
            other @ DeltaError::ReplayDivergence { .. } => Self::Storage(other.to_string()),
        }
    }
}

impl From<DagError> for WeftError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::NodeNotFound(id) => Self::NotFound(format!("dag node {id}")),
            DagError::EmptyFamily(id) => Self::NotFound(format!("family of {id}")),
            DagError::BrokenChain(id) => Self::Storage(format!("broken parent chain at {id}")),
            DagError::Repo(e) => e.into(),
            DagError::Delta(e) => e.into(),
        }
    }
}

impl From<EventError> for WeftError {
    fn from(err: EventError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<TypeError> for WeftError {
    fn from(err: TypeError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Convenience alias for façade results.
pub type WeftResult<T> = Result<T, WeftError>;
