use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use weft_crypto::ContentHasher;
use weft_types::ContentHash;

use crate::compress::{self, Compression};
use crate::entry::{ContentEntry, ContentStat, ReapReport, StoredPayload, Tier, TierReport};
use crate::error::{ContentError, ContentResult};
use crate::traits::ContentStore;

/// Tuning for an [`InMemoryContentStore`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentConfig {
    /// zstd level used when compressing new entries.
    pub compression_level: i32,
    /// Payloads shorter than this are stored uncompressed.
    pub min_compress_bytes: usize,
    /// Directory cold entries are offloaded to. `None` keeps them inline.
    pub cold_dir: Option<PathBuf>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            compression_level: 3,
            min_compress_bytes: 64,
            cold_dir: None,
        }
    }
}

/// In-memory, HashMap-based content store.
///
/// The map lock is only held for lookups, inserts and removals. Reference
/// counts, tiers and access times live in atomics on each entry, so `put` of
/// already-stored bytes and every `retain`/`release` run under the shared
/// read lock.
pub struct InMemoryContentStore {
    entries: RwLock<HashMap<ContentHash, Arc<ContentEntry>>>,
    config: ContentConfig,
    epoch: Instant,
}

impl InMemoryContentStore {
    /// Create a new empty store with default settings.
    pub fn new() -> Self {
        Self::with_config(ContentConfig::default())
    }

    pub fn with_config(config: ContentConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            epoch: Instant::now(),
        }
    }

    /// Number of entries currently stored, referenced or not.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Total encoded bytes held inline or externally.
    pub fn stored_bytes(&self) -> u64 {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .map(|e| e.stored_size)
            .sum()
    }

    /// Sum of all reference counts.
    pub fn total_refs(&self) -> u64 {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .map(|e| e.ref_count())
            .sum()
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn lookup(&self, hash: &ContentHash) -> Option<Arc<ContentEntry>> {
        self.entries
            .read()
            .expect("lock poisoned")
            .get(hash)
            .cloned()
    }

    fn require(&self, hash: &ContentHash) -> ContentResult<Arc<ContentEntry>> {
        self.lookup(hash).ok_or(ContentError::NotFound(*hash))
    }

    fn read_stored(entry: &ContentEntry) -> ContentResult<Vec<u8>> {
        let location = entry.payload.read().expect("lock poisoned").clone();
        match location {
            StoredPayload::Inline(bytes) => Ok(bytes),
            StoredPayload::External(path) => Ok(std::fs::read(path)?),
        }
    }

    /// Move an entry one tier hotter without blocking.
    ///
    /// Cold entries that were offloaded come back inline when promoted. If
    /// the payload lock is contended the promotion is simply skipped.
    fn promote(&self, entry: &ContentEntry, stored: &[u8]) {
        let tier = entry.tier();
        if tier == Tier::Hot {
            return;
        }
        if tier == Tier::Cold {
            let Ok(mut payload) = entry.payload.try_write() else {
                return;
            };
            if let StoredPayload::External(path) = &*payload {
                if let Err(err) = std::fs::remove_file(path) {
                    warn!(hash = %entry.hash.short_hex(), %err, "failed to remove offloaded payload");
                }
                *payload = StoredPayload::Inline(stored.to_vec());
            }
        }
        entry.set_tier(tier.hotter());
        debug!(hash = %entry.hash.short_hex(), from = %tier, to = %tier.hotter(), "promoted content");
    }

    fn offload(&self, entry: &ContentEntry) -> ContentResult<bool> {
        let Some(dir) = &self.config.cold_dir else {
            return Ok(false);
        };
        let mut payload = entry.payload.write().expect("lock poisoned");
        let StoredPayload::Inline(bytes) = &*payload else {
            return Ok(false);
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(entry.hash.to_hex());
        std::fs::write(&path, bytes)?;
        *payload = StoredPayload::External(path);
        Ok(true)
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for InMemoryContentStore {
    fn put(&self, data: &[u8]) -> ContentResult<ContentHash> {
        let hash = ContentHasher::CONTENT.hash(data);
        let now = self.now_ms();

        // Retain under the read guard so a concurrent reap cannot remove
        // the entry between lookup and increment.
        {
            let map = self.entries.read().expect("lock poisoned");
            if let Some(existing) = map.get(&hash) {
                let refs = existing.retain();
                existing.touch(now);
                debug!(hash = %hash.short_hex(), refs, "deduplicated content");
                return Ok(hash);
            }
        }

        // Compress outside the map lock; losing an insert race is harmless.
        let (compression, stored) = compress::encode(
            data,
            self.config.compression_level,
            self.config.min_compress_bytes,
        )?;

        let mut map = self.entries.write().expect("lock poisoned");
        if let Some(existing) = map.get(&hash) {
            existing.retain();
            existing.touch(now);
            return Ok(hash);
        }
        let entry = ContentEntry::new(hash, data.len() as u64, compression, stored, now);
        debug!(
            hash = %hash.short_hex(),
            size = entry.size,
            stored = entry.stored_size,
            %compression,
            "stored new content"
        );
        map.insert(hash, Arc::new(entry));
        Ok(hash)
    }

    fn get(&self, hash: &ContentHash) -> ContentResult<Vec<u8>> {
        let entry = self.require(hash)?;
        let stored = Self::read_stored(&entry)?;
        let data = compress::decode(entry.compression, &stored)?;

        let computed = ContentHasher::CONTENT.hash(&data);
        if computed != *hash {
            return Err(ContentError::HashMismatch {
                expected: *hash,
                computed,
            });
        }

        entry.touch(self.now_ms());
        self.promote(&entry, &stored);
        Ok(data)
    }

    fn retain(&self, hash: &ContentHash) -> ContentResult<u64> {
        let map = self.entries.read().expect("lock poisoned");
        let entry = map.get(hash).ok_or(ContentError::NotFound(*hash))?;
        Ok(entry.retain())
    }

    fn release(&self, hash: &ContentHash) -> ContentResult<u64> {
        let entry = self.require(hash)?;
        let remaining = entry
            .release(self.now_ms())
            .ok_or(ContentError::RefCountUnderflow(*hash))?;
        if remaining == 0 {
            debug!(hash = %hash.short_hex(), "content unreferenced");
        }
        Ok(remaining)
    }

    fn stat(&self, hash: &ContentHash) -> ContentResult<Option<ContentStat>> {
        Ok(self.lookup(hash).map(|e| e.stat()))
    }

    fn collect_garbage(&self, grace: Duration) -> ContentResult<ReapReport> {
        let now = self.now_ms();
        let grace_ms = grace.as_millis() as u64;
        let mut report = ReapReport::default();

        // Exclusive lock: put and retain increment under the read guard, so
        // no zero count observed here can be revived mid-reap.
        let mut map = self.entries.write().expect("lock poisoned");
        let candidates: Vec<ContentHash> = map
            .values()
            .filter_map(|e| match e.zeroed_for(now) {
                Some(age) if age >= grace_ms => Some(e.hash),
                Some(_) => {
                    report.deferred += 1;
                    None
                }
                None => None,
            })
            .collect();

        for hash in candidates {
            let Some(entry) = map.remove(&hash) else {
                continue;
            };
            if let StoredPayload::External(path) = &*entry.payload.read().expect("lock poisoned") {
                std::fs::remove_file(path)?;
            }
            report.bytes_freed += entry.stored_size;
            report.reaped.push(hash);
        }

        if !report.reaped.is_empty() {
            info!(
                reaped = report.reaped.len(),
                bytes = report.bytes_freed,
                deferred = report.deferred,
                "collected unreferenced content"
            );
        }
        Ok(report)
    }

    fn demote_idle(
        &self,
        warm_after: Duration,
        cold_after: Duration,
    ) -> ContentResult<TierReport> {
        let now = self.now_ms();
        let warm_ms = warm_after.as_millis() as u64;
        let cold_ms = cold_after.as_millis() as u64;
        let entries: Vec<Arc<ContentEntry>> = self
            .entries
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();

        let mut report = TierReport::default();
        for entry in entries {
            let idle = entry.idle_for(now);
            match entry.tier() {
                Tier::Hot if idle >= cold_ms => {
                    entry.set_tier(Tier::Cold);
                    report.to_cold += 1;
                    if self.offload(&entry)? {
                        report.offloaded += 1;
                    }
                }
                Tier::Hot if idle >= warm_ms => {
                    entry.set_tier(Tier::Warm);
                    report.to_warm += 1;
                }
                Tier::Warm if idle >= cold_ms => {
                    entry.set_tier(Tier::Cold);
                    report.to_cold += 1;
                    if self.offload(&entry)? {
                        report.offloaded += 1;
                    }
                }
                _ => {}
            }
        }

        if report.to_warm + report.to_cold > 0 {
            debug!(
                to_warm = report.to_warm,
                to_cold = report.to_cold,
                offloaded = report.offloaded,
                "demoted idle content"
            );
        }
        Ok(report)
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContentStore")
            .field("entry_count", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
