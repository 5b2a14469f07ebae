use weft_content::ContentError;
use weft_repo::RepoError;
use weft_types::{ContentHash, ObjectId, TypeError};

/// Errors produced by the delta engine.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Type(#[from] TypeError),

    /// The patch cannot be applied to the current payload.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// The operation is not valid in the object's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: u64, max: u64 },

    /// Replaying the chain did not reproduce a recorded result.
    #[error("replay of {object} diverged at version {version}: recorded {recorded}, computed {computed}")]
    ReplayDivergence {
        object: ObjectId,
        version: u64,
        recorded: ContentHash,
        computed: ContentHash,
    },
}

impl DeltaError {
    /// Whether this is an optimistic-concurrency loss a caller may retry.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Repo(RepoError::VersionConflict { .. }))
    }
}

/// Result alias for delta engine operations.
pub type DeltaResult<T> = Result<T, DeltaError>;
