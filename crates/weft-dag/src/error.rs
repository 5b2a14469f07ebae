use weft_delta::DeltaError;
use weft_repo::RepoError;
use weft_types::ObjectId;

/// Errors that can occur during DAG operations.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// The object is not part of the DAG being queried.
    #[error("node not found: {0}")]
    NodeNotFound(ObjectId),

    /// A family with no members (the root was purged).
    #[error("empty family for root {0}")]
    EmptyFamily(ObjectId),

    /// A parent chain did not terminate at the root.
    #[error("broken parent chain at {0}")]
    BrokenChain(ObjectId),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Delta(#[from] DeltaError),
}

/// Convenience alias for DAG results.
pub type DagResult<T> = Result<T, DagError>;
