use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::RwLock;

use chrono::Utc;
use tracing::{debug, info};
use weft_types::{
    Checkpoint, ContentHash, Delta, DeltaId, DeltaStatus, Object, ObjectId, ObjectMetadata,
    OwnerId, Page, Paged, Patch,
};

use crate::error::{RepoError, RepoResult};
use crate::traits::{ObjectRepository, OwnerUsage, PurgedObject};

/// Rejected deltas kept per object; older ones are dropped first.
pub const MAX_FAILED_PER_OBJECT: usize = 32;

/// In-memory repository for tests, local demos, and embedding.
///
/// A single `RwLock` guards all tables, so every write (including the
/// version check in `append_delta`) is one critical section.
pub struct InMemoryRepository {
    inner: RwLock<RepoState>,
}

#[derive(Default)]
struct RepoState {
    objects: HashMap<ObjectId, Object>,
    children: HashMap<ObjectId, Vec<ObjectId>>,
    /// Secondary index: `(owner_id, root_id)` to family members.
    families: HashMap<(OwnerId, ObjectId), Vec<ObjectId>>,
    /// Applied deltas, indexed by `to_version - 1`.
    chains: HashMap<ObjectId, Vec<Delta>>,
    failed: HashMap<ObjectId, VecDeque<Delta>>,
    checkpoints: HashMap<ObjectId, BTreeMap<u64, Checkpoint>>,
    delta_index: HashMap<DeltaId, (ObjectId, u64)>,
}

impl RepoState {
    fn object(&self, id: &ObjectId) -> RepoResult<&Object> {
        self.objects.get(id).ok_or(RepoError::ObjectNotFound(*id))
    }

    fn chain(&self, id: &ObjectId) -> &[Delta] {
        self.chains.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    fn children_of(&self, id: &ObjectId) -> &[ObjectId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    fn collect(&self, ids: &[ObjectId]) -> Vec<Object> {
        ids.iter()
            .filter_map(|id| self.objects.get(id).cloned())
            .collect()
    }

    fn check_parent(&self, object: &Object) -> RepoResult<()> {
        let Some(parent_id) = object.parent_id else {
            if object.root_id != object.id || object.depth != 0 {
                return Err(RepoError::InvalidDelta(
                    "a root object must be its own root at depth 0".into(),
                ));
            }
            return Ok(());
        };
        let invalid = |reason: &str| RepoError::InvalidParent {
            parent: parent_id,
            reason: reason.into(),
        };
        let parent = self
            .objects
            .get(&parent_id)
            .ok_or_else(|| invalid("parent does not exist"))?;
        if parent.owner_id != object.owner_id {
            return Err(invalid("parent belongs to a different owner"));
        }
        if parent.is_tombstoned() {
            return Err(invalid("parent is tombstoned"));
        }
        if object.root_id != parent.root_id || object.depth != parent.depth + 1 {
            return Err(invalid("root or depth does not follow from the parent"));
        }
        Ok(())
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RepoState::default()),
        }
    }

    /// Number of objects, tombstoned ones included.
    pub fn object_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").objects.len()
    }

    /// Every object an owner has, ordered by id.
    pub fn objects_by_owner(&self, owner: &OwnerId) -> Vec<Object> {
        let state = self.inner.read().expect("lock poisoned");
        let mut objects: Vec<Object> = state
            .families
            .iter()
            .filter(|((o, _), _)| o == owner)
            .flat_map(|(_, members)| state.collect(members))
            .collect();
        objects.sort_by_key(|o| o.id);
        objects
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRepository for InMemoryRepository {
    fn create(&self, mut object: Object, mut genesis: Delta) -> RepoResult<Object> {
        if genesis.object_id != object.id {
            return Err(RepoError::InvalidDelta(
                "create delta targets a different object".into(),
            ));
        }
        if !matches!(genesis.patch(), Patch::Create { .. })
            || genesis.from_version != 0
            || object.version != 0
        {
            return Err(RepoError::InvalidDelta(
                "objects start with a create delta from version 0".into(),
            ));
        }
        let Some(result) = genesis.result.clone() else {
            return Err(RepoError::InvalidDelta("create delta has no content".into()));
        };
        object.metadata.validate()?;

        let mut state = self.inner.write().expect("lock poisoned");
        if state.objects.contains_key(&object.id) {
            return Err(RepoError::AlreadyExists(object.id));
        }
        state.check_parent(&object)?;

        genesis.mark_applied();
        object.version = genesis.to_version;
        object.content_ref = result.hash;
        object.size = result.size;
        object.content_type = result.content_type;
        if let Some(at) = genesis.applied_at {
            object.updated_at = at;
        }

        let id = object.id;
        if let Some(parent) = object.parent_id {
            state.children.entry(parent).or_default().push(id);
        }
        state
            .families
            .entry((object.owner_id.clone(), object.root_id))
            .or_default()
            .push(id);
        state.delta_index.insert(genesis.id, (id, genesis.to_version));
        state.chains.insert(id, vec![genesis]);
        state.objects.insert(id, object.clone());

        debug!(object = %id, depth = object.depth, root = %object.root_id, "object created");
        Ok(object)
    }

    fn get(&self, id: &ObjectId, version: Option<u64>) -> RepoResult<Object> {
        let state = self.inner.read().expect("lock poisoned");
        let current = state.object(id)?;
        let Some(version) = version.filter(|v| *v != current.version) else {
            return Ok(current.clone());
        };
        let not_found = RepoError::VersionNotFound { id: *id, version };
        if version == 0 || version > current.version {
            return Err(not_found);
        }
        let chain = state.chain(id);
        let Some(reached) = chain.get(..version as usize) else {
            return Err(not_found);
        };
        let Some(at) = reached.last() else {
            return Err(not_found);
        };

        // Metadata is not versioned; the as-of view carries the current one.
        let mut view = current.clone();
        view.version = version;
        view.updated_at = at.applied_at.unwrap_or(at.created_at);
        view.deleted_at = None;
        if let Some(content) = reached.iter().rev().find_map(|d| d.result.as_ref()) {
            view.content_ref = content.hash;
            view.size = content.size;
            view.content_type = content.content_type.clone();
        }
        Ok(view)
    }

    fn children(&self, id: &ObjectId) -> RepoResult<Vec<Object>> {
        let state = self.inner.read().expect("lock poisoned");
        state.object(id)?;
        Ok(state.collect(state.children_of(id)))
    }

    fn descendants(&self, id: &ObjectId, max_depth: Option<u32>) -> RepoResult<Vec<Object>> {
        let state = self.inner.read().expect("lock poisoned");
        let origin = state.object(id)?;
        let limit = max_depth.map(|d| origin.depth.saturating_add(d));

        let mut out = Vec::new();
        let mut queue: VecDeque<ObjectId> = state.children_of(id).iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            let Some(object) = state.objects.get(&next) else {
                continue;
            };
            if object.root_id != origin.root_id || limit.is_some_and(|l| object.depth > l) {
                continue;
            }
            queue.extend(state.children_of(&next).iter().copied());
            out.push(object.clone());
        }
        Ok(out)
    }

    fn ancestors(&self, id: &ObjectId) -> RepoResult<Vec<Object>> {
        let state = self.inner.read().expect("lock poisoned");
        let object = state.object(id)?;
        let mut out = Vec::with_capacity(object.depth as usize);
        let mut cursor = object.parent_id;
        // A chain can never be longer than the object's depth.
        while let Some(parent_id) = cursor.filter(|_| out.len() < object.depth as usize) {
            let parent = state.object(&parent_id)?;
            cursor = parent.parent_id;
            out.push(parent.clone());
        }
        Ok(out)
    }

    fn family(&self, root_id: &ObjectId) -> RepoResult<Vec<Object>> {
        let state = self.inner.read().expect("lock poisoned");
        let root = state.object(root_id)?;
        let key = (root.owner_id.clone(), root.root_id);
        let mut members = state
            .families
            .get(&key)
            .map(|ids| state.collect(ids))
            .unwrap_or_default();
        members.sort_by_key(|o| (o.depth, o.id));
        Ok(members)
    }

    fn append_delta(&self, mut delta: Delta) -> RepoResult<Object> {
        let mut state = self.inner.write().expect("lock poisoned");
        let RepoState {
            objects,
            chains,
            delta_index,
            ..
        } = &mut *state;

        let object = objects
            .get_mut(&delta.object_id)
            .ok_or(RepoError::ObjectNotFound(delta.object_id))?;
        if object.is_tombstoned() {
            return Err(RepoError::ObjectTombstoned(object.id));
        }
        if delta.from_version != object.version {
            debug!(
                object = %object.id,
                expected = delta.from_version,
                found = object.version,
                "version conflict"
            );
            return Err(RepoError::VersionConflict {
                id: object.id,
                expected: delta.from_version,
                found: object.version,
            });
        }
        match (delta.patch(), &delta.result) {
            (Patch::Create { .. }, _) => {
                return Err(RepoError::InvalidDelta(
                    "create deltas are only accepted when the object is created".into(),
                ))
            }
            (Patch::Delete, Some(_)) => {
                return Err(RepoError::InvalidDelta("delete delta carries content".into()))
            }
            (Patch::Delete, None) => {}
            (_, None) => {
                return Err(RepoError::InvalidDelta(format!(
                    "{} delta has no resulting content",
                    delta.operation()
                )))
            }
            (_, Some(_)) => {}
        }

        delta.mark_applied();
        let applied_at = delta.applied_at.unwrap_or_else(Utc::now);
        object.version = delta.to_version;
        object.updated_at = applied_at;
        match &delta.result {
            Some(result) => {
                object.content_ref = result.hash;
                object.size = result.size;
                object.content_type = result.content_type.clone();
            }
            None => object.deleted_at = Some(applied_at),
        }

        debug!(
            object = %object.id,
            version = object.version,
            operation = %delta.operation(),
            "delta applied"
        );
        delta_index.insert(delta.id, (object.id, delta.to_version));
        chains.entry(object.id).or_default().push(delta);
        Ok(object.clone())
    }

    fn record_failed(&self, mut delta: Delta) -> RepoResult<()> {
        if delta.status != DeltaStatus::Failed {
            delta.mark_failed("rejected");
        }
        let mut state = self.inner.write().expect("lock poisoned");
        let failed = state.failed.entry(delta.object_id).or_default();
        if failed.len() >= MAX_FAILED_PER_OBJECT {
            failed.pop_front();
        }
        failed.push_back(delta);
        Ok(())
    }

    fn failed_deltas(&self, id: &ObjectId) -> RepoResult<Vec<Delta>> {
        let state = self.inner.read().expect("lock poisoned");
        Ok(state
            .failed
            .get(id)
            .map(|failed| failed.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn deltas(&self, id: &ObjectId, from: u64, to: u64) -> RepoResult<Vec<Delta>> {
        let state = self.inner.read().expect("lock poisoned");
        state.object(id)?;
        Ok(state
            .chain(id)
            .iter()
            .filter(|d| d.to_version > from && d.to_version <= to)
            .cloned()
            .collect())
    }

    fn delta(&self, id: &ObjectId, version: u64) -> RepoResult<Delta> {
        let state = self.inner.read().expect("lock poisoned");
        state.object(id)?;
        version
            .checked_sub(1)
            .and_then(|index| state.chain(id).get(index as usize))
            .cloned()
            .ok_or(RepoError::VersionNotFound { id: *id, version })
    }

    fn find_delta(&self, delta_id: &DeltaId) -> RepoResult<Option<Delta>> {
        let state = self.inner.read().expect("lock poisoned");
        Ok(state.delta_index.get(delta_id).and_then(|(object, version)| {
            state.chain(object).get((*version - 1) as usize).cloned()
        }))
    }

    fn history(&self, id: &ObjectId, page: Page) -> RepoResult<Paged<Delta>> {
        let state = self.inner.read().expect("lock poisoned");
        state.object(id)?;
        Ok(page.apply(state.chain(id).to_vec()))
    }

    fn set_metadata(&self, id: &ObjectId, metadata: ObjectMetadata) -> RepoResult<Object> {
        metadata.validate()?;
        let mut state = self.inner.write().expect("lock poisoned");
        let object = state
            .objects
            .get_mut(id)
            .ok_or(RepoError::ObjectNotFound(*id))?;
        object.metadata = metadata;
        Ok(object.clone())
    }

    fn put_checkpoint(&self, checkpoint: Checkpoint) -> RepoResult<()> {
        let mut state = self.inner.write().expect("lock poisoned");
        let object = state.object(&checkpoint.object_id)?;
        if checkpoint.version == 0 || checkpoint.version > object.version {
            return Err(RepoError::VersionNotFound {
                id: checkpoint.object_id,
                version: checkpoint.version,
            });
        }
        debug!(object = %checkpoint.object_id, version = checkpoint.version, "checkpoint stored");
        state
            .checkpoints
            .entry(checkpoint.object_id)
            .or_default()
            .insert(checkpoint.version, checkpoint);
        Ok(())
    }

    fn latest_checkpoint(&self, id: &ObjectId, version: u64) -> RepoResult<Option<Checkpoint>> {
        let state = self.inner.read().expect("lock poisoned");
        state.object(id)?;
        Ok(state
            .checkpoints
            .get(id)
            .and_then(|cps| cps.range(..=version).next_back())
            .map(|(_, cp)| cp.clone()))
    }

    fn owner_usage(&self, owner: &OwnerId) -> RepoResult<OwnerUsage> {
        let state = self.inner.read().expect("lock poisoned");
        let mut usage = OwnerUsage::default();
        for ((family_owner, _), members) in &state.families {
            if family_owner != owner {
                continue;
            }
            for object in members.iter().filter_map(|id| state.objects.get(id)) {
                if !object.is_tombstoned() {
                    usage.objects += 1;
                    usage.bytes += object.size;
                }
            }
        }
        Ok(usage)
    }

    fn purge(&self, id: &ObjectId) -> RepoResult<PurgedObject> {
        let mut state = self.inner.write().expect("lock poisoned");
        state.object(id)?;
        let count = state.children_of(id).len();
        if count > 0 {
            return Err(RepoError::HasChildren { id: *id, count });
        }

        let Some(object) = state.objects.remove(id) else {
            return Err(RepoError::ObjectNotFound(*id));
        };
        state.children.remove(id);
        if let Some(parent) = object.parent_id {
            if let Some(siblings) = state.children.get_mut(&parent) {
                siblings.retain(|c| c != id);
            }
        }
        let key = (object.owner_id.clone(), object.root_id);
        if let Some(members) = state.families.get_mut(&key) {
            members.retain(|m| m != id);
            if members.is_empty() {
                state.families.remove(&key);
            }
        }

        let mut held: Vec<ContentHash> = Vec::new();
        for delta in state.chains.remove(id).unwrap_or_default() {
            state.delta_index.remove(&delta.id);
            held.extend(delta.held_content());
        }
        if let Some(checkpoints) = state.checkpoints.remove(id) {
            held.extend(checkpoints.values().filter_map(|cp| cp.content.as_ref().map(|c| c.hash)));
        }
        state.failed.remove(id);

        info!(object = %id, released = held.len(), "object purged");
        Ok(PurgedObject { object, held })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::{Actor, ContentRef, UpdatePatch};

    fn owner(name: &str) -> OwnerId {
        OwnerId::new(name).unwrap()
    }

    fn content(data: &[u8]) -> ContentRef {
        ContentRef {
            hash: ContentHash::from_bytes(data),
            size: data.len() as u64,
            content_type: "text/plain".into(),
        }
    }

    fn genesis(object: &Object, c: &ContentRef) -> Delta {
        Delta::new(
            object.id,
            0,
            Patch::Create {
                content: c.hash,
                content_type: c.content_type.clone(),
            },
            object.created_by.clone(),
            Some(c.clone()),
        )
    }

    fn create_root(repo: &InMemoryRepository, who: &str, data: &[u8]) -> Object {
        let c = content(data);
        let o = Object::new_root(
            owner(who),
            c.clone(),
            Actor::User(owner(who)),
            ObjectMetadata::new(),
        );
        let g = genesis(&o, &c);
        repo.create(o, g).unwrap()
    }

    fn create_child(repo: &InMemoryRepository, parent: &Object, data: &[u8]) -> Object {
        let c = content(data);
        let o = Object::new_child(
            parent,
            c.clone(),
            Actor::Transform("summarize".into()),
            ObjectMetadata::new(),
        );
        let g = genesis(&o, &c);
        repo.create(o, g).unwrap()
    }

    fn replace(object: &Object, data: &[u8]) -> Delta {
        let c = content(data);
        Delta::new(
            object.id,
            object.version,
            Patch::Update(UpdatePatch::Replace { content: c.hash }),
            object.created_by.clone(),
            Some(c),
        )
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    #[test]
    fn create_root_starts_at_version_one() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"hello");
        assert_eq!(root.version, 1);
        assert_eq!(root.root_id, root.id);
        assert_eq!(root.depth, 0);
        let chain = repo.deltas(&root.id, 0, u64::MAX).unwrap();
        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_applied());
    }

    #[test]
    fn child_inherits_root_and_depth() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"root");
        let child = create_child(&repo, &root, b"child");
        let grandchild = create_child(&repo, &child, b"grandchild");
        assert_eq!(child.root_id, root.id);
        assert_eq!(grandchild.root_id, root.id);
        assert_eq!(grandchild.depth, 2);
        assert_eq!(grandchild.parent_id, Some(child.id));
    }

    #[test]
    fn missing_parent_is_invalid() {
        let repo = InMemoryRepository::new();
        create_root(&repo, "alice", b"root");
        let orphan_parent = Object::new_root(
            owner("alice"),
            content(b"ghost"),
            Actor::User(owner("alice")),
            ObjectMetadata::new(),
        );
        let c = content(b"orphan");
        let o = Object::new_child(&orphan_parent, c.clone(), Actor::User(owner("alice")), ObjectMetadata::new());
        let g = genesis(&o, &c);
        assert!(matches!(repo.create(o, g), Err(RepoError::InvalidParent { .. })));
        assert_eq!(repo.object_count(), 1);
    }

    #[test]
    fn cross_owner_parent_is_invalid() {
        let repo = InMemoryRepository::new();
        let alices = create_root(&repo, "alice", b"private");
        let c = content(b"stolen");
        let mut o = Object::new_child(&alices, c.clone(), Actor::User(owner("bob")), ObjectMetadata::new());
        o.owner_id = owner("bob");
        let g = genesis(&o, &c);
        let err = repo.create(o, g).unwrap_err();
        assert!(matches!(err, RepoError::InvalidParent { parent, .. } if parent == alices.id));
    }

    #[test]
    fn tombstoned_parent_is_invalid() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"root");
        let delete = Delta::new(root.id, 1, Patch::Delete, Actor::User(owner("alice")), None);
        let root = repo.append_delta(delete).unwrap();
        let c = content(b"late");
        let o = Object::new_child(&root, c.clone(), Actor::User(owner("alice")), ObjectMetadata::new());
        let g = genesis(&o, &c);
        assert!(matches!(repo.create(o, g), Err(RepoError::InvalidParent { .. })));
    }

    #[test]
    fn create_requires_a_create_delta() {
        let repo = InMemoryRepository::new();
        let c = content(b"x");
        let o = Object::new_root(owner("alice"), c.clone(), Actor::User(owner("alice")), ObjectMetadata::new());
        let bogus = Delta::new(o.id, 0, Patch::Delete, Actor::User(owner("alice")), None);
        assert!(matches!(repo.create(o, bogus), Err(RepoError::InvalidDelta(_))));
    }

    // -----------------------------------------------------------------------
    // Versioning
    // -----------------------------------------------------------------------

    #[test]
    fn append_increments_version_and_updates_caches() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"v1");
        let updated = repo.append_delta(replace(&root, b"v2 longer")).unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.content_ref, ContentHash::from_bytes(b"v2 longer"));
        assert_eq!(updated.size, 9);
    }

    #[test]
    fn stale_delta_is_a_version_conflict() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"v1");
        let first = replace(&root, b"a");
        let second = replace(&root, b"b");
        repo.append_delta(first).unwrap();
        let err = repo.append_delta(second).unwrap_err();
        assert_eq!(
            err,
            RepoError::VersionConflict {
                id: root.id,
                expected: 1,
                found: 2
            }
        );
        assert_eq!(repo.get(&root.id, None).unwrap().version, 2);
    }

    #[test]
    fn concurrent_appends_have_exactly_one_winner() {
        use std::sync::Arc;
        use std::thread;

        let repo = Arc::new(InMemoryRepository::new());
        let root = create_root(&repo, "alice", b"v1");
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let repo = Arc::clone(&repo);
                let delta = replace(&root, &[i]);
                thread::spawn(move || repo.append_delta(delta).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(repo.get(&root.id, None).unwrap().version, 2);
    }

    #[test]
    fn deleted_objects_reject_further_deltas() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"v1");
        let delete = Delta::new(root.id, 1, Patch::Delete, Actor::User(owner("alice")), None);
        let deleted = repo.append_delta(delete).unwrap();
        assert!(deleted.is_tombstoned());
        assert_eq!(deleted.version, 2);
        assert_eq!(
            repo.append_delta(replace(&deleted, b"zombie")).unwrap_err(),
            RepoError::ObjectTombstoned(root.id)
        );
    }

    #[test]
    fn get_as_of_version() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"v1");
        let v2 = repo.append_delta(replace(&root, b"v2")).unwrap();
        let delete = Delta::new(root.id, 2, Patch::Delete, Actor::User(owner("alice")), None);
        repo.append_delta(delete).unwrap();

        let at1 = repo.get(&root.id, Some(1)).unwrap();
        assert_eq!(at1.version, 1);
        assert_eq!(at1.content_ref, ContentHash::from_bytes(b"v1"));
        assert!(!at1.is_tombstoned());

        let latest = repo.get(&root.id, None).unwrap();
        assert!(latest.is_tombstoned());
        assert_eq!(latest.content_ref, v2.content_ref, "delete keeps the last content");

        assert!(matches!(
            repo.get(&root.id, Some(9)),
            Err(RepoError::VersionNotFound { version: 9, .. })
        ));
        assert!(matches!(
            repo.get(&root.id, Some(0)),
            Err(RepoError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn failed_deltas_are_kept_apart() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"v1");
        let mut loser = replace(&root, b"lost");
        loser.mark_failed("version conflict");
        repo.record_failed(loser).unwrap();
        assert_eq!(repo.failed_deltas(&root.id).unwrap().len(), 1);
        assert_eq!(repo.history(&root.id, Page::default()).unwrap().total, 1);
    }

    #[test]
    fn failed_deltas_are_capped_oldest_first() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"v1");
        let mut ids = Vec::new();
        for i in 0..MAX_FAILED_PER_OBJECT + 5 {
            let loser = replace(&root, format!("lost {i}").as_bytes());
            ids.push(loser.id);
            repo.record_failed(loser).unwrap();
        }
        let failed = repo.failed_deltas(&root.id).unwrap();
        assert_eq!(failed.len(), MAX_FAILED_PER_OBJECT);
        assert_eq!(failed[0].id, ids[5]);
        assert_eq!(failed.last().unwrap().id, *ids.last().unwrap());
    }

    #[test]
    fn find_delta_and_history_paging() {
        let repo = InMemoryRepository::new();
        let mut object = create_root(&repo, "alice", b"v1");
        let mut last = None;
        for i in 0..5u8 {
            let d = replace(&object, &[i; 3]);
            last = Some(d.id);
            object = repo.append_delta(d).unwrap();
        }
        let found = repo.find_delta(&last.unwrap()).unwrap().unwrap();
        assert_eq!(found.to_version, 6);

        let page = repo.history(&object.id, Page::new(1, 4)).unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].to_version, 5);
        assert!(!page.has_more());
    }

    // -----------------------------------------------------------------------
    // DAG queries
    // -----------------------------------------------------------------------

    #[test]
    fn descendants_are_breadth_first_and_depth_bounded() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"r");
        let a = create_child(&repo, &root, b"a");
        let b = create_child(&repo, &root, b"b");
        let a1 = create_child(&repo, &a, b"a1");
        let a1x = create_child(&repo, &a1, b"a1x");

        let all = repo.descendants(&root.id, None).unwrap();
        let depths: Vec<u32> = all.iter().map(|o| o.depth).collect();
        assert_eq!(depths, vec![1, 1, 2, 3]);

        let near = repo.descendants(&root.id, Some(1)).unwrap();
        let ids: Vec<ObjectId> = near.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);

        let from_a = repo.descendants(&a.id, Some(1)).unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a[0].id, a1.id);

        let ancestors: Vec<ObjectId> =
            repo.ancestors(&a1x.id).unwrap().iter().map(|o| o.id).collect();
        assert_eq!(ancestors, vec![a1.id, a.id, root.id]);
    }

    #[test]
    fn family_is_scoped_by_root() {
        let repo = InMemoryRepository::new();
        let r1 = create_root(&repo, "alice", b"one");
        let r2 = create_root(&repo, "alice", b"two");
        create_child(&repo, &r1, b"c1");
        create_child(&repo, &r2, b"c2");
        let family = repo.family(&r1.id).unwrap();
        assert_eq!(family.len(), 2);
        assert!(family.iter().all(|o| o.root_id == r1.id));
        assert_eq!(repo.objects_by_owner(&owner("alice")).len(), 4);
    }

    // -----------------------------------------------------------------------
    // Usage, checkpoints, purge
    // -----------------------------------------------------------------------

    #[test]
    fn owner_usage_counts_live_objects() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"12345");
        create_child(&repo, &root, b"123");
        create_root(&repo, "bob", b"1");
        let usage = repo.owner_usage(&owner("alice")).unwrap();
        assert_eq!(usage, OwnerUsage { objects: 2, bytes: 8 });

        let delete = Delta::new(root.id, 1, Patch::Delete, Actor::User(owner("alice")), None);
        repo.append_delta(delete).unwrap();
        let usage = repo.owner_usage(&owner("alice")).unwrap();
        assert_eq!(usage, OwnerUsage { objects: 1, bytes: 3 });
    }

    #[test]
    fn latest_checkpoint_at_or_below() {
        let repo = InMemoryRepository::new();
        let mut object = create_root(&repo, "alice", b"v1");
        for i in 0..4u8 {
            object = repo.append_delta(replace(&object, &[i])).unwrap();
        }
        for version in [2, 4] {
            repo.put_checkpoint(Checkpoint {
                object_id: object.id,
                version,
                content: Some(content(&[version as u8])),
                tombstoned: false,
            })
            .unwrap();
        }
        assert_eq!(repo.latest_checkpoint(&object.id, 3).unwrap().unwrap().version, 2);
        assert_eq!(repo.latest_checkpoint(&object.id, 5).unwrap().unwrap().version, 4);
        assert!(repo.latest_checkpoint(&object.id, 1).unwrap().is_none());

        let beyond = Checkpoint {
            object_id: object.id,
            version: 99,
            content: None,
            tombstoned: false,
        };
        assert!(repo.put_checkpoint(beyond).is_err());
    }

    #[test]
    fn purge_returns_held_content_and_refuses_parents() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"root");
        let child = create_child(&repo, &root, b"child");
        let child = repo.append_delta(replace(&child, b"child v2")).unwrap();
        repo.put_checkpoint(Checkpoint {
            object_id: child.id,
            version: 2,
            content: Some(child.content()),
            tombstoned: false,
        })
        .unwrap();

        assert!(matches!(
            repo.purge(&root.id),
            Err(RepoError::HasChildren { count: 1, .. })
        ));

        let purged = repo.purge(&child.id).unwrap();
        assert_eq!(purged.held.len(), 3);
        assert!(repo.children(&root.id).unwrap().is_empty());
        assert!(matches!(repo.get(&child.id, None), Err(RepoError::ObjectNotFound(_))));

        let purged = repo.purge(&root.id).unwrap();
        assert_eq!(purged.held, vec![ContentHash::from_bytes(b"root")]);
        assert_eq!(repo.object_count(), 0);
        assert!(repo.objects_by_owner(&owner("alice")).is_empty());
    }

    #[test]
    fn set_metadata_does_not_bump_version() {
        let repo = InMemoryRepository::new();
        let root = create_root(&repo, "alice", b"v1");
        let updated = repo
            .set_metadata(&root.id, ObjectMetadata::new().with_title("annotated"))
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.metadata.title.as_deref(), Some("annotated"));
    }
}
