//! DAG views and change propagation for Weft object families.
//!
//! An object family (everything sharing one `root_id`) forms a tree-shaped
//! DAG through `parent_id`. This crate provides:
//!
//! - [`DagView`]: an immutable snapshot of one family with level, child and
//!   path queries, built from the repository.
//! - [`DagCache`]: a TTL cache of views keyed by root id.
//! - [`Propagator`]: re-runs derived objects' transforms level by level
//!   after an ancestor changes.
//! - [`TransformRegistry`]: the explicit table of [`Transform`]s
//!   propagation may call.
//! - [`CancellationSource`] / [`CancellationToken`] for stopping a run
//!   between levels.

pub mod cache;
pub mod cancel;
pub mod error;
pub mod propagate;
pub mod transform;
pub mod view;

pub use cache::{CacheStats, DagCache};
pub use cancel::{CancellationReason, CancellationSource, CancellationToken};
pub use error::{DagError, DagResult};
pub use propagate::{
    LevelReport, NodeOutcome, NodeReport, PropagationConfig, PropagationObserver,
    PropagationReport, Propagator, SkipReason,
};
pub use transform::{Transform, TransformError, TransformInput, TransformOutput, TransformRegistry};
pub use view::{DagEdge, DagNode, DagView};
