//! Foundation types for Weft.
//!
//! This crate provides the identifiers and records shared by every other
//! Weft crate. It performs no I/O and holds no state.
//!
//! # Key Types
//!
//! - [`ObjectId`] / [`DeltaId`] -- UUID v7 identifiers (time ordered, globally unique)
//! - [`OwnerId`] -- the owning principal; every query is scoped by it
//! - [`ContentHash`] -- BLAKE3 content address of a stored payload
//! - [`Object`] -- versioned content record with DAG pointers
//! - [`Delta`] / [`Patch`] -- one recorded, replayable state transition
//! - [`ObjectMetadata`] -- typed known fields plus a bounded open map
//! - [`Page`] / [`Paged`] -- pagination for read operations

pub mod delta;
pub mod error;
pub mod hash;
pub mod id;
pub mod metadata;
pub mod object;
pub mod page;

pub use delta::{
    Checkpoint, ContentRef, Delta, DeltaOperation, DeltaStatus, Patch, UpdatePatch,
};
pub use error::TypeError;
pub use hash::ContentHash;
pub use id::{Actor, DeltaId, ObjectId, OwnerId};
pub use metadata::{ObjectMetadata, ProcessingFailure};
pub use object::Object;
pub use page::{Page, Paged};
