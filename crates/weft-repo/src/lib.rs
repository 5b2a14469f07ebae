//! Object and delta repository for Weft.
//!
//! Stores objects with their applied delta chains and answers the DAG-shaped
//! queries (children, descendants, ancestors, family) the rest of the system
//! needs. Every query is bounded by the object's `root_id`.
//!
//! # Guarantees
//!
//! - `append_delta` is the only optimistic-concurrency guard: a delta built
//!   against a stale version fails with [`RepoError::VersionConflict`].
//! - Applying a delta, flipping its status and updating the object's cached
//!   fields happen in one critical section.
//! - Tombstoned objects accept no further deltas.
//! - `parent_id`, `root_id` and `depth` are checked at creation and never
//!   written again.

pub mod error;
pub mod memory;
pub mod traits;
pub mod validation;

pub use error::{RepoError, RepoResult};
pub use memory::{InMemoryRepository, MAX_FAILED_PER_OBJECT};
pub use traits::{ObjectRepository, OwnerUsage, PurgedObject};
pub use validation::{ChainValidator, ValidationReport, Violation, ViolationKind};
