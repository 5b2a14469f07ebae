use weft_types::{ObjectId, TypeError};

/// Errors produced by repository operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("object {id} has no version {version}")]
    VersionNotFound { id: ObjectId, version: u64 },

    /// Dangling, tombstoned or cross-owner parent reference.
    #[error("invalid parent {parent}: {reason}")]
    InvalidParent { parent: ObjectId, reason: String },

    /// Optimistic concurrency loss. `expected` is the version the delta was
    /// built against, `found` the object's current version.
    #[error("version conflict on {id}: expected {expected}, found {found}")]
    VersionConflict {
        id: ObjectId,
        expected: u64,
        found: u64,
    },

    #[error("object {0} is tombstoned")]
    ObjectTombstoned(ObjectId),

    #[error("object {id} still has {count} children")]
    HasChildren { id: ObjectId, count: usize },

    #[error("object already exists: {0}")]
    AlreadyExists(ObjectId),

    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Result alias for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;
