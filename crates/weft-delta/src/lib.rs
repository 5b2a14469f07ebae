//! Delta engine for Weft.
//!
//! Turns change requests into self-describing, replayable deltas and commits
//! them transactionally: content is stored first, the repository commit
//! second, and a failed commit releases the content it staged.
//!
//! # Determinism
//!
//! Every patch carries what it needs to be replayed. Anything that would
//! otherwise be resolved at apply time (the bytes of a replacement, the
//! content a revert restores) is stored and referenced by hash before the
//! delta is persisted. [`apply_patch`] is the single step function used for
//! both apply and replay.

pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod patch;
pub mod proposal;

pub use config::DeltaConfig;
pub use diff::{diff_payloads, DiffLine, LineChange, VersionDiff};
pub use engine::{DeltaEngine, Replay};
pub use error::{DeltaError, DeltaResult};
pub use patch::{apply_patch, Materialized};
pub use proposal::{Applied, ChangeRequest, DeltaProposal, NewObject, UpdateRequest};
