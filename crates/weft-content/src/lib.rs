//! Content-addressed payload storage for Weft.
//!
//! Every payload an object version points at is stored here exactly once,
//! keyed by the domain-separated BLAKE3 hash of its bytes. Objects and
//! versions that share bytes share one entry and bump its reference count.
//!
//! # Storage Backends
//!
//! All backends implement the [`ContentStore`] trait:
//!
//! - [`InMemoryContentStore`] -- `HashMap`-based store with hot/warm/cold
//!   tiers; cold entries can be offloaded to a directory as external files
//!
//! # Design Rules
//!
//! 1. Payloads are immutable once written (content addressing guarantees this).
//! 2. `put` of existing bytes never writes; it only increments `ref_count`.
//! 3. `ref_count` is only changed with atomic increments and decrements.
//! 4. Physical deletion happens out of band ([`Reaper`]) and only for
//!    entries that have sat at zero references for a grace period.
//! 5. Tier promotion on read is best-effort and never blocks a reader.
//! 6. All I/O errors are propagated, never silently ignored.

pub mod compress;
pub mod entry;
pub mod error;
pub mod memory;
pub mod reaper;
pub mod traits;

pub use compress::Compression;
pub use entry::{ContentStat, ReapReport, Tier, TierReport};
pub use error::{ContentError, ContentResult};
pub use memory::{ContentConfig, InMemoryContentStore};
pub use reaper::{Reaper, ReaperConfig, ReaperHandle, ReaperStats};
pub use traits::ContentStore;
