//! Content entries and the reports produced by maintenance passes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use weft_types::ContentHash;

use crate::compress::Compression;

/// Storage tier of an entry. Reads promote toward `Hot`; idle entries are
/// demoted toward `Cold` by the maintenance pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Hot = 0,
    Warm = 1,
    Cold = 2,
}

impl Tier {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Hot,
            1 => Self::Warm,
            _ => Self::Cold,
        }
    }

    /// One step hotter, saturating at `Hot`.
    pub fn hotter(self) -> Self {
        match self {
            Self::Cold => Self::Warm,
            Self::Warm | Self::Hot => Self::Hot,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hot => write!(f, "hot"),
            Self::Warm => write!(f, "warm"),
            Self::Cold => write!(f, "cold"),
        }
    }
}

/// Where an entry's encoded bytes live.
#[derive(Clone, Debug)]
pub(crate) enum StoredPayload {
    Inline(Vec<u8>),
    External(PathBuf),
}

const NOT_ZEROED: u64 = u64::MAX;

/// A single deduplicated payload.
///
/// Everything a concurrent reader or writer may touch without holding the
/// store's map lock is atomic; the payload location has its own lock so a
/// tier move never blocks the whole store.
#[derive(Debug)]
pub(crate) struct ContentEntry {
    pub hash: ContentHash,
    pub size: u64,
    pub stored_size: u64,
    pub compression: Compression,
    pub payload: RwLock<StoredPayload>,
    ref_count: AtomicU64,
    tier: AtomicU8,
    last_access_ms: AtomicU64,
    zeroed_at_ms: AtomicU64,
}

impl ContentEntry {
    pub fn new(
        hash: ContentHash,
        size: u64,
        compression: Compression,
        stored: Vec<u8>,
        now_ms: u64,
    ) -> Self {
        Self {
            hash,
            size,
            stored_size: stored.len() as u64,
            compression,
            payload: RwLock::new(StoredPayload::Inline(stored)),
            ref_count: AtomicU64::new(1),
            tier: AtomicU8::new(Tier::Hot as u8),
            last_access_ms: AtomicU64::new(now_ms),
            zeroed_at_ms: AtomicU64::new(NOT_ZEROED),
        }
    }

    pub fn ref_count(&self) -> u64 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Atomically add a reference, reviving an entry waiting for the reaper.
    pub fn retain(&self) -> u64 {
        let prev = self.ref_count.fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            self.zeroed_at_ms.store(NOT_ZEROED, Ordering::Release);
        }
        prev + 1
    }

    /// Atomically drop a reference. Returns `None` on underflow.
    pub fn release(&self, now_ms: u64) -> Option<u64> {
        let prev = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()?;
        if prev == 1 {
            self.zeroed_at_ms.store(now_ms, Ordering::Release);
        }
        Some(prev - 1)
    }

    /// Milliseconds the entry has been unreferenced, if it is.
    pub fn zeroed_for(&self, now_ms: u64) -> Option<u64> {
        if self.ref_count() != 0 {
            return None;
        }
        match self.zeroed_at_ms.load(Ordering::Acquire) {
            NOT_ZEROED => None,
            at => Some(now_ms.saturating_sub(at)),
        }
    }

    pub fn tier(&self) -> Tier {
        Tier::from_u8(self.tier.load(Ordering::Acquire))
    }

    pub fn set_tier(&self, tier: Tier) {
        self.tier.store(tier as u8, Ordering::Release);
    }

    pub fn touch(&self, now_ms: u64) {
        self.last_access_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    pub fn idle_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_access_ms.load(Ordering::Acquire))
    }

    pub fn stat(&self) -> ContentStat {
        ContentStat {
            hash: self.hash,
            size: self.size,
            stored_size: self.stored_size,
            ref_count: self.ref_count(),
            compression: self.compression,
            tier: self.tier(),
        }
    }
}

/// Point-in-time view of one entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStat {
    pub hash: ContentHash,
    /// Size of the original payload.
    pub size: u64,
    /// Size of the encoded bytes at rest.
    pub stored_size: u64,
    pub ref_count: u64,
    pub compression: Compression,
    pub tier: Tier,
}

/// Outcome of a garbage-collection pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub reaped: Vec<ContentHash>,
    pub bytes_freed: u64,
    /// Zero-reference entries still inside their grace period.
    pub deferred: usize,
}

/// Outcome of a tier demotion pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TierReport {
    pub to_warm: usize,
    pub to_cold: usize,
    /// Cold entries whose bytes were moved to external storage.
    pub offloaded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ContentEntry {
        ContentEntry::new(
            ContentHash::from_bytes(b"x"),
            1,
            Compression::None,
            b"x".to_vec(),
            0,
        )
    }

    #[test]
    fn retain_and_release_are_balanced() {
        let e = entry();
        assert_eq!(e.ref_count(), 1);
        assert_eq!(e.retain(), 2);
        assert_eq!(e.release(10), Some(1));
        assert_eq!(e.zeroed_for(20), None);
        assert_eq!(e.release(10), Some(0));
        assert_eq!(e.zeroed_for(25), Some(15));
    }

    #[test]
    fn release_below_zero_is_rejected() {
        let e = entry();
        assert_eq!(e.release(0), Some(0));
        assert_eq!(e.release(0), None);
        assert_eq!(e.ref_count(), 0);
    }

    #[test]
    fn retain_revives_zeroed_entry() {
        let e = entry();
        e.release(5);
        assert!(e.zeroed_for(6).is_some());
        e.retain();
        assert_eq!(e.zeroed_for(100), None);
    }

    #[test]
    fn tier_ordering_and_promotion() {
        assert_eq!(Tier::Cold.hotter(), Tier::Warm);
        assert_eq!(Tier::Warm.hotter(), Tier::Hot);
        assert_eq!(Tier::Hot.hotter(), Tier::Hot);
        let e = entry();
        assert_eq!(e.tier(), Tier::Hot);
        e.set_tier(Tier::Cold);
        assert_eq!(e.tier(), Tier::Cold);
    }

    #[test]
    fn idle_tracking() {
        let e = entry();
        e.touch(100);
        assert_eq!(e.idle_for(150), 50);
        e.touch(50);
        assert_eq!(e.idle_for(150), 50, "touch never moves backwards");
    }
}
