use std::time::Duration;

use weft_types::ContentHash;

use crate::entry::{ContentStat, ReapReport, TierReport};
use crate::error::ContentResult;

/// Deduplicating content-addressed payload store.
///
/// All implementations must satisfy these invariants:
/// - The same bytes always produce the same hash and at most one entry.
/// - `ref_count` equals the number of live object versions (and
///   checkpoints) referencing the entry. It is only changed atomically.
/// - Entries are removed only by [`collect_garbage`], and only after sitting
///   at zero references for longer than the grace period.
///
/// [`collect_garbage`]: ContentStore::collect_garbage
pub trait ContentStore: Send + Sync {
    /// Store bytes and return their hash.
    ///
    /// If the bytes are already stored, this only increments the entry's
    /// reference count.
    fn put(&self, data: &[u8]) -> ContentResult<ContentHash>;

    /// Read the original bytes of an entry.
    ///
    /// Returns `NotFound` if absent. Reading may promote the entry one tier
    /// hotter on a best-effort basis.
    fn get(&self, hash: &ContentHash) -> ContentResult<Vec<u8>>;

    /// Add a reference to an existing entry. Returns the new count.
    fn retain(&self, hash: &ContentHash) -> ContentResult<u64>;

    /// Drop a reference. Returns the new count.
    ///
    /// Reaching zero does not delete anything; the entry becomes eligible
    /// for collection once the grace period has passed.
    fn release(&self, hash: &ContentHash) -> ContentResult<u64>;

    /// Inspect an entry without touching its tier or access time.
    fn stat(&self, hash: &ContentHash) -> ContentResult<Option<ContentStat>>;

    /// Physically remove zero-reference entries older than `grace`.
    fn collect_garbage(&self, grace: Duration) -> ContentResult<ReapReport>;

    /// Move entries idle for `warm_after` to `Warm` and for `cold_after`
    /// to `Cold`.
    fn demote_idle(&self, warm_after: Duration, cold_after: Duration)
        -> ContentResult<TierReport>;

    /// Check whether an entry exists (referenced or not).
    fn contains(&self, hash: &ContentHash) -> ContentResult<bool> {
        Ok(self.stat(hash)?.is_some())
    }

    /// Release every hash in `hashes`, stopping at the first error.
    fn release_all(&self, hashes: &[ContentHash]) -> ContentResult<()> {
        for hash in hashes {
            self.release(hash)?;
        }
        Ok(())
    }
}
