use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::debug;
use weft_repo::ObjectRepository;
use weft_types::ObjectId;

use crate::error::DagResult;
use crate::view::DagView;

/// Short-lived cache of [`DagView`]s keyed by root id.
///
/// Views expire after `ttl` and are dropped eagerly by [`invalidate`]
/// whenever a family gains or loses members.
///
/// [`invalidate`]: DagCache::invalidate
pub struct DagCache {
    ttl: Duration,
    views: RwLock<HashMap<ObjectId, Arc<DagView>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Hit/miss counters since the cache was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl DagCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            views: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached view for `root_id`, rebuilding it when missing or
    /// older than the TTL.
    pub fn get_or_build(
        &self,
        repo: &dyn ObjectRepository,
        root_id: &ObjectId,
    ) -> DagResult<Arc<DagView>> {
        {
            let views = self.views.read().expect("lock poisoned");
            if let Some(view) = views.get(root_id) {
                if view.built_at().elapsed() < self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::clone(view));
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let view = Arc::new(DagView::build(repo, root_id)?);
        self.views
            .write()
            .expect("lock poisoned")
            .insert(view.root_id(), Arc::clone(&view));
        Ok(view)
    }

    /// Drop the cached view of one family.
    pub fn invalidate(&self, root_id: &ObjectId) {
        if self
            .views
            .write()
            .expect("lock poisoned")
            .remove(root_id)
            .is_some()
        {
            debug!(root = %root_id, "dag view invalidated");
        }
    }

    pub fn clear(&self) {
        self.views.write().expect("lock poisoned").clear();
    }

    /// Remove every expired view. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let mut views = self.views.write().expect("lock poisoned");
        let before = views.len();
        views.retain(|_, view| view.built_at().elapsed() < self.ttl);
        before - views.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.views.read().expect("lock poisoned").len(),
        }
    }
}

impl std::fmt::Debug for DagCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_repo::InMemoryRepository;
    use weft_types::{
        Actor, ContentHash, ContentRef, Delta, Object, ObjectMetadata, OwnerId, Patch,
    };

    fn add(repo: &InMemoryRepository, parent: Option<&Object>) -> Object {
        let owner = OwnerId::new("alice").unwrap();
        let c = ContentRef {
            hash: ContentHash::from_bytes(b"x"),
            size: 1,
            content_type: "text/plain".into(),
        };
        let actor = Actor::User(owner.clone());
        let object = match parent {
            Some(p) => Object::new_child(p, c.clone(), actor.clone(), ObjectMetadata::new()),
            None => Object::new_root(owner, c.clone(), actor.clone(), ObjectMetadata::new()),
        };
        let genesis = Delta::new(
            object.id,
            0,
            Patch::Create {
                content: c.hash,
                content_type: c.content_type.clone(),
            },
            actor,
            Some(c),
        );
        repo.create(object, genesis).unwrap()
    }

    #[test]
    fn second_lookup_hits() {
        let repo = InMemoryRepository::new();
        let root = add(&repo, None);
        let cache = DagCache::new(Duration::from_secs(60));

        let first = cache.get_or_build(&repo, &root.id).unwrap();
        let second = cache.get_or_build(&repo, &root.id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[test]
    fn invalidate_forces_a_rebuild() {
        let repo = InMemoryRepository::new();
        let root = add(&repo, None);
        let cache = DagCache::new(Duration::from_secs(60));

        assert_eq!(cache.get_or_build(&repo, &root.id).unwrap().len(), 1);
        add(&repo, Some(&root));
        // Still the stale view until invalidated.
        assert_eq!(cache.get_or_build(&repo, &root.id).unwrap().len(), 1);
        cache.invalidate(&root.id);
        assert_eq!(cache.get_or_build(&repo, &root.id).unwrap().len(), 2);
    }

    #[test]
    fn zero_ttl_never_serves_cached_views() {
        let repo = InMemoryRepository::new();
        let root = add(&repo, None);
        let cache = DagCache::new(Duration::ZERO);

        cache.get_or_build(&repo, &root.id).unwrap();
        cache.get_or_build(&repo, &root.id).unwrap();
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.stats().entries, 0);
    }
}
