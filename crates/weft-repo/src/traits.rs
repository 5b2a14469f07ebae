use weft_types::{
    Checkpoint, ContentHash, Delta, DeltaId, Object, ObjectId, ObjectMetadata, OwnerId, Page,
    Paged,
};

use crate::error::RepoResult;

/// Live usage of one owner, as seen by quota checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OwnerUsage {
    /// Non-tombstoned objects.
    pub objects: u64,
    /// Sum of current payload sizes of non-tombstoned objects.
    pub bytes: u64,
}

/// An object removed by [`ObjectRepository::purge`].
#[derive(Clone, Debug)]
pub struct PurgedObject {
    pub object: Object,
    /// One entry per content reference the object held (applied versions
    /// and checkpoints). The caller releases these from the content store.
    pub held: Vec<ContentHash>,
}

/// Storage boundary for objects and their delta chains.
///
/// `append_delta` is the only per-object serialization point: it succeeds
/// only if the delta was built against the object's current version.
pub trait ObjectRepository: Send + Sync {
    /// Persist a new object together with its applied create delta.
    fn create(&self, object: Object, genesis: Delta) -> RepoResult<Object>;

    /// Latest state, or the as-of view at `version`.
    fn get(&self, id: &ObjectId, version: Option<u64>) -> RepoResult<Object>;

    fn children(&self, id: &ObjectId) -> RepoResult<Vec<Object>>;

    /// Breadth-first descendants, shallowest first. `max_depth` is relative
    /// to `id` (1 = children only).
    fn descendants(&self, id: &ObjectId, max_depth: Option<u32>) -> RepoResult<Vec<Object>>;

    /// Parent chain, nearest first, ending at the root.
    fn ancestors(&self, id: &ObjectId) -> RepoResult<Vec<Object>>;

    /// Every object sharing `root_id`, ordered by depth.
    fn family(&self, root_id: &ObjectId) -> RepoResult<Vec<Object>>;

    /// Apply a pending delta and return the updated object.
    fn append_delta(&self, delta: Delta) -> RepoResult<Object>;

    /// Keep a proposal that lost or failed, for inspection.
    fn record_failed(&self, delta: Delta) -> RepoResult<()>;

    fn failed_deltas(&self, id: &ObjectId) -> RepoResult<Vec<Delta>>;

    /// Applied deltas with `from < to_version <= to`, in order.
    fn deltas(&self, id: &ObjectId, from: u64, to: u64) -> RepoResult<Vec<Delta>>;

    /// The applied delta that produced `version`.
    fn delta(&self, id: &ObjectId, version: u64) -> RepoResult<Delta>;

    fn find_delta(&self, delta_id: &DeltaId) -> RepoResult<Option<Delta>>;

    /// Applied deltas oldest first, one page at a time.
    fn history(&self, id: &ObjectId, page: Page) -> RepoResult<Paged<Delta>>;

    /// Annotation write that does not create a version.
    fn set_metadata(&self, id: &ObjectId, metadata: ObjectMetadata) -> RepoResult<Object>;

    fn put_checkpoint(&self, checkpoint: Checkpoint) -> RepoResult<()>;

    /// Most recent checkpoint at or below `version`.
    fn latest_checkpoint(&self, id: &ObjectId, version: u64) -> RepoResult<Option<Checkpoint>>;

    fn owner_usage(&self, owner: &OwnerId) -> RepoResult<OwnerUsage>;

    /// Physically remove a childless object with its deltas and checkpoints.
    fn purge(&self, id: &ObjectId) -> RepoResult<PurgedObject>;
}
