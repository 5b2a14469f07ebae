use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use weft_content::ContentStore;
use weft_dag::{CancellationReason, CancellationSource, DagCache, DagNode, Propagator};
use weft_delta::{Applied, ChangeRequest, DeltaEngine, DeltaProposal, NewObject, VersionDiff};
use weft_events::{EventFilter, EventStream, SubscriptionTable};
use weft_repo::{ChainValidator, ObjectRepository, OwnerUsage, ValidationReport};
use weft_types::{Actor, Delta, DeltaId, Object, ObjectId, OwnerId, Page, Paged};

use crate::config::WeftConfig;
use crate::error::{WeftError, WeftResult};
use crate::handle::{PropagationHandle, RunRegistry};
use crate::inbound::InboundRoute;
use crate::publish::Publisher;
use crate::quota::QuotaProvider;

/// How [`Weft::delete_object`] removes an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteMode {
    /// Append a delete delta. History and content stay until purged.
    Soft,
    /// Tombstone the object and every descendant, then purge them all and
    /// release their content.
    Cascade,
}

/// What a delete did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Objects that received a delete delta.
    pub tombstoned: Vec<ObjectId>,
    /// Objects removed from the repository (cascade only).
    pub purged: Vec<ObjectId>,
    /// Content references released.
    pub released: usize,
    pub cancelled_propagations: usize,
}

/// Chain integrity plus replay agreement for one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectHealth {
    pub chain: ValidationReport,
    /// Checkpointed and from-genesis replay produce the same state.
    pub replay_converges: bool,
}

impl ObjectHealth {
    pub fn is_healthy(&self) -> bool {
        self.chain.is_valid() && self.replay_converges
    }
}

pub(crate) struct Inner {
    pub(crate) config: WeftConfig,
    pub(crate) engine: Arc<DeltaEngine>,
    pub(crate) dag_cache: Arc<DagCache>,
    pub(crate) propagator: Propagator,
    pub(crate) quota: Arc<dyn QuotaProvider>,
    pub(crate) publisher: Arc<Publisher>,
    pub(crate) inbound: SubscriptionTable<InboundRoute>,
    pub(crate) runs: Arc<RunRegistry>,
    /// Serializes quota check + create so concurrent creates cannot both
    /// pass the last free slot.
    pub(crate) create_gate: Mutex<()>,
}

/// The versioned content-object store.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Weft {
    pub(crate) inner: Arc<Inner>,
}

impl Weft {
    pub fn builder() -> crate::builder::WeftBuilder {
        crate::builder::WeftBuilder::new()
    }

    pub fn config(&self) -> &WeftConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &Arc<DeltaEngine> {
        &self.inner.engine
    }

    pub fn repo(&self) -> &Arc<dyn ObjectRepository> {
        self.inner.engine.repo()
    }

    pub fn content(&self) -> &Arc<dyn ContentStore> {
        self.inner.engine.content()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Create an object. With `parent_id` set this derives a child of an
    /// object the same owner holds.
    pub fn create_object(&self, request: NewObject) -> WeftResult<Object> {
        Ok(self.create(&request)?.object)
    }

    /// Create a child of `parent_id` from `request`.
    pub fn derive_object(&self, parent_id: &ObjectId, request: NewObject) -> WeftResult<Object> {
        self.create_object(request.with_parent(*parent_id))
    }

    pub(crate) fn create(&self, request: &NewObject) -> WeftResult<Applied> {
        let applied = {
            let _gate = self.inner.create_gate.lock().expect("lock poisoned");
            self.check_quota(&request.owner_id, request.payload.len() as u64)?;
            self.inner.engine.create(request)?
        };
        if applied.object.parent_id.is_some() {
            self.inner.dag_cache.invalidate(&applied.object.root_id);
        }
        self.inner.publisher.announce(&applied);
        Ok(applied)
    }

    /// Apply one change to an object the owner holds. Version conflicts are
    /// retried unless the proposal pins an expected version.
    pub fn apply_delta(
        &self,
        owner: &OwnerId,
        object_id: &ObjectId,
        proposal: DeltaProposal,
    ) -> WeftResult<Applied> {
        self.owned(owner, object_id, None)?;
        let applied = self.inner.engine.apply_with_retry(
            object_id,
            &proposal,
            self.inner.config.limits.max_conflict_retries,
        )?;
        self.after_commit(&applied);
        Ok(applied)
    }

    /// Append a delta restoring `target_version`'s content.
    pub fn revert(
        &self,
        owner: &OwnerId,
        object_id: &ObjectId,
        target_version: u64,
    ) -> WeftResult<Object> {
        let proposal = DeltaProposal::new(
            ChangeRequest::Revert { target_version },
            Actor::User(owner.clone()),
        );
        Ok(self.apply_delta(owner, object_id, proposal)?.object)
    }

    pub fn delete_object(
        &self,
        owner: &OwnerId,
        object_id: &ObjectId,
        mode: DeleteMode,
    ) -> WeftResult<DeleteReport> {
        let object = self.owned(owner, object_id, None)?;
        match mode {
            DeleteMode::Soft => {
                let applied = self.tombstone(owner, &object)?;
                Ok(DeleteReport {
                    tombstoned: vec![object.id],
                    cancelled_propagations: self.after_commit(&applied),
                    ..DeleteReport::default()
                })
            }
            DeleteMode::Cascade => self.purge_subtree(owner, object),
        }
    }

    fn purge_subtree(&self, owner: &OwnerId, object: Object) -> WeftResult<DeleteReport> {
        let repo = self.repo();
        let mut subtree = repo.descendants(&object.id, None)?;
        subtree.push(object.clone());
        subtree.sort_by_key(|o| (o.depth, o.id));

        let ids: Vec<ObjectId> = subtree.iter().map(|o| o.id).collect();
        let mut report = DeleteReport {
            cancelled_propagations: self
                .inner
                .runs
                .cancel_origins(&ids, CancellationReason::ObjectDeleted),
            ..DeleteReport::default()
        };

        for member in subtree.iter().filter(|o| !o.is_tombstoned()) {
            match self.tombstone(owner, member) {
                Ok(applied) => {
                    self.inner.publisher.announce(&applied);
                    report.tombstoned.push(member.id);
                }
                // Deleted concurrently.
                Err(WeftError::ObjectTombstoned(_)) => {}
                Err(err) => return Err(err),
            }
        }

        for member in subtree.iter().rev() {
            let purged = repo.purge(&member.id)?;
            self.content().release_all(&purged.held)?;
            report.released += purged.held.len();
            report.purged.push(member.id);
        }
        self.inner.dag_cache.invalidate(&object.root_id);
        info!(
            object = %object.id,
            purged = report.purged.len(),
            released = report.released,
            "subtree purged"
        );
        Ok(report)
    }

    fn tombstone(&self, owner: &OwnerId, object: &Object) -> WeftResult<Applied> {
        let proposal = DeltaProposal::new(ChangeRequest::Delete, Actor::User(owner.clone()));
        Ok(self.inner.engine.apply_with_retry(
            &object.id,
            &proposal,
            self.inner.config.limits.max_conflict_retries,
        )?)
    }

    /// Post-commit bookkeeping. Returns the number of propagations a delete
    /// cancelled.
    fn after_commit(&self, applied: &Applied) -> usize {
        let mut cancelled = 0;
        if applied.object.is_tombstoned() {
            self.inner.dag_cache.invalidate(&applied.object.root_id);
            cancelled = self
                .inner
                .runs
                .cancel_origins(&[applied.object.id], CancellationReason::ObjectDeleted);
        }
        self.inner.publisher.announce(applied);
        cancelled
    }

    fn check_quota(&self, owner: &OwnerId, new_bytes: u64) -> WeftResult<()> {
        let usage = self.repo().owner_usage(owner)?;
        self.inner
            .quota
            .limits(owner)
            .admits(usage, new_bytes)
            .map_err(|reason| WeftError::QuotaExceeded {
                owner: owner.clone(),
                reason,
            })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The object at `version` (latest if `None`). Objects of other owners
    /// are reported as not found.
    pub fn get_object(
        &self,
        owner: &OwnerId,
        object_id: &ObjectId,
        version: Option<u64>,
    ) -> WeftResult<Object> {
        self.owned(owner, object_id, version)
    }

    /// Payload of the object at `version` (latest if `None`).
    pub fn get_content(
        &self,
        owner: &OwnerId,
        object_id: &ObjectId,
        version: Option<u64>,
    ) -> WeftResult<Vec<u8>> {
        let object = self.owned(owner, object_id, version)?;
        Ok(self.content().get(&object.content_ref)?)
    }

    /// The object's family in parents-first order, one page at a time.
    pub fn get_dag(
        &self,
        owner: &OwnerId,
        object_id: &ObjectId,
        page: Page,
    ) -> WeftResult<Paged<DagNode>> {
        let object = self.owned(owner, object_id, None)?;
        let view = self
            .inner
            .dag_cache
            .get_or_build(self.repo().as_ref(), &object.root_id)?;
        Ok(view.page(page)?)
    }

    /// Applied deltas, oldest first.
    pub fn delta_history(
        &self,
        owner: &OwnerId,
        object_id: &ObjectId,
        page: Page,
    ) -> WeftResult<Paged<Delta>> {
        self.owned(owner, object_id, None)?;
        Ok(self.repo().history(object_id, page)?)
    }

    pub fn diff_versions(
        &self,
        owner: &OwnerId,
        object_id: &ObjectId,
        from: u64,
        to: u64,
    ) -> WeftResult<VersionDiff> {
        self.owned(owner, object_id, None)?;
        Ok(self.inner.engine.diff_versions(object_id, from, to)?)
    }

    pub fn usage(&self, owner: &OwnerId) -> WeftResult<OwnerUsage> {
        Ok(self.repo().owner_usage(owner)?)
    }

    pub fn validate_object(&self, owner: &OwnerId, object_id: &ObjectId) -> WeftResult<ObjectHealth> {
        self.owned(owner, object_id, None)?;
        let chain = ChainValidator::validate_object(self.repo().as_ref(), object_id)?;
        let replay_converges = self.inner.engine.verify_checkpoint_convergence(object_id)?;
        Ok(ObjectHealth {
            chain,
            replay_converges,
        })
    }

    pub(crate) fn owned(
        &self,
        owner: &OwnerId,
        object_id: &ObjectId,
        version: Option<u64>,
    ) -> WeftResult<Object> {
        let object = self.repo().get(object_id, version)?;
        if object.owner_id != *owner {
            return Err(WeftError::NotFound(format!("object {object_id}")));
        }
        Ok(object)
    }

    // -----------------------------------------------------------------------
    // Propagation & events
    // -----------------------------------------------------------------------

    /// Start propagating the change `delta_id` made to `object_id` in the
    /// background. Must be called from within a tokio runtime. Objects of
    /// other owners are reported as not found.
    pub fn propagate(
        &self,
        owner: &OwnerId,
        object_id: &ObjectId,
        delta_id: &DeltaId,
    ) -> WeftResult<PropagationHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WeftError::Internal(format!("propagation needs a tokio runtime: {e}")))?;
        let object = self.owned(owner, object_id, None)?;
        match self.repo().find_delta(delta_id)? {
            Some(delta) if delta.object_id == *object_id => {}
            _ => return Err(WeftError::NotFound(format!("delta {delta_id} of {object_id}"))),
        }

        let source = CancellationSource::new();
        let run_id = self
            .inner
            .runs
            .register(object.id, object.root_id, source.clone());
        let propagator = self.inner.propagator.clone();
        let token = source.token();
        let (origin, cause) = (object.id, *delta_id);
        debug!(origin = %origin, cause = %cause, "propagation scheduled");
        Ok(PropagationHandle::spawn(
            &runtime,
            Arc::clone(&self.inner.runs),
            run_id,
            origin,
            cause,
            source,
            async move { propagator.propagate(origin, cause, token).await },
        ))
    }

    /// Propagations still running.
    pub fn running_propagations(&self) -> usize {
        self.inner.runs.len()
    }

    /// Cancel every running propagation in the family of `root_id`.
    pub fn cancel_family(&self, root_id: &ObjectId) -> usize {
        self.inner
            .runs
            .cancel_family(root_id, CancellationReason::Requested)
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        self.inner.publisher.bus().subscribe(filter)
    }

    /// Cancel all running propagations. In-flight levels still finish.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.inner.runs.cancel_all(CancellationReason::Shutdown);
        info!(cancelled, "weft shutting down");
        cancelled
    }
}

impl std::fmt::Debug for Weft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Weft")
            .field("propagator", &self.inner.propagator)
            .field("running_propagations", &self.running_propagations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{QuotaLimits, StaticQuota};
    use weft_delta::UpdateRequest;
    use weft_events::EventType;

    fn alice() -> OwnerId {
        OwnerId::new("alice").unwrap()
    }

    fn bob() -> OwnerId {
        OwnerId::new("bob").unwrap()
    }

    fn weft() -> Weft {
        Weft::builder().build().unwrap()
    }

    fn text(owner: OwnerId, body: &str) -> NewObject {
        NewObject::new(owner, body.as_bytes().to_vec(), "text/plain")
    }

    fn append(owner: &OwnerId, bytes: &str) -> DeltaProposal {
        DeltaProposal::new(
            ChangeRequest::Update(UpdateRequest::Append {
                bytes: bytes.as_bytes().to_vec(),
            }),
            Actor::User(owner.clone()),
        )
    }

    // -----------------------------------------------------------------------
    // Ownership
    // -----------------------------------------------------------------------

    #[test]
    fn foreign_owner_sees_nothing() {
        let weft = weft();
        let doc = weft.create_object(text(alice(), "secret")).unwrap();

        assert!(matches!(
            weft.get_object(&bob(), &doc.id, None),
            Err(WeftError::NotFound(_))
        ));
        assert!(matches!(
            weft.get_content(&bob(), &doc.id, None),
            Err(WeftError::NotFound(_))
        ));
        assert!(matches!(
            weft.apply_delta(&bob(), &doc.id, append(&bob(), "!")),
            Err(WeftError::NotFound(_))
        ));
        assert!(matches!(
            weft.delete_object(&bob(), &doc.id, DeleteMode::Soft),
            Err(WeftError::NotFound(_))
        ));
    }

    #[test]
    fn deriving_from_a_foreign_parent_is_invalid() {
        let weft = weft();
        let doc = weft.create_object(text(alice(), "a")).unwrap();
        assert!(matches!(
            weft.derive_object(&doc.id, text(bob(), "b")),
            Err(WeftError::InvalidParent { .. })
        ));
        assert_eq!(weft.usage(&bob()).unwrap().objects, 0);
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    #[test]
    fn apply_and_read_back_any_version() {
        let weft = weft();
        let doc = weft.create_object(text(alice(), "one")).unwrap();
        let applied = weft
            .apply_delta(&alice(), &doc.id, append(&alice(), " two"))
            .unwrap();
        assert_eq!(applied.object.version, 2);

        assert_eq!(weft.get_content(&alice(), &doc.id, None).unwrap(), b"one two");
        assert_eq!(weft.get_content(&alice(), &doc.id, Some(1)).unwrap(), b"one");
        let history = weft.delta_history(&alice(), &doc.id, Page::first(10)).unwrap();
        assert_eq!(history.total, 2);

        let diff = weft.diff_versions(&alice(), &doc.id, 1, 2).unwrap();
        assert!(!diff.is_unchanged());
    }

    #[test]
    fn pinned_stale_version_conflicts() {
        let weft = weft();
        let doc = weft.create_object(text(alice(), "x")).unwrap();
        weft.apply_delta(&alice(), &doc.id, append(&alice(), "y"))
            .unwrap();

        let stale = append(&alice(), "z").expecting(1);
        let err = weft.apply_delta(&alice(), &doc.id, stale).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn revert_appends_a_new_version() {
        let weft = weft();
        let doc = weft.create_object(text(alice(), "draft")).unwrap();
        weft.apply_delta(&alice(), &doc.id, append(&alice(), " edited"))
            .unwrap();

        let reverted = weft.revert(&alice(), &doc.id, 1).unwrap();
        assert_eq!(reverted.version, 3);
        assert_eq!(reverted.content_ref, doc.content_ref);
    }

    #[test]
    fn quota_counts_live_objects() {
        let quota = StaticQuota::new(QuotaLimits::objects(1));
        let weft = Weft::builder().quota(Arc::new(quota)).build().unwrap();

        let first = weft.create_object(text(alice(), "1")).unwrap();
        assert!(matches!(
            weft.create_object(text(alice(), "2")),
            Err(WeftError::QuotaExceeded { .. })
        ));
        // Other owners have their own budget.
        weft.create_object(text(bob(), "1")).unwrap();

        weft.delete_object(&alice(), &first.id, DeleteMode::Soft)
            .unwrap();
        weft.create_object(text(alice(), "2")).unwrap();
    }

    // -----------------------------------------------------------------------
    // Deletes
    // -----------------------------------------------------------------------

    #[test]
    fn soft_delete_keeps_history() {
        let weft = weft();
        let doc = weft.create_object(text(alice(), "bye")).unwrap();
        let report = weft
            .delete_object(&alice(), &doc.id, DeleteMode::Soft)
            .unwrap();
        assert_eq!(report.tombstoned, vec![doc.id]);
        assert!(report.purged.is_empty());

        let gone = weft.get_object(&alice(), &doc.id, None).unwrap();
        assert!(gone.is_tombstoned());
        assert_eq!(weft.get_content(&alice(), &doc.id, Some(1)).unwrap(), b"bye");
        assert!(matches!(
            weft.apply_delta(&alice(), &doc.id, append(&alice(), "!")),
            Err(WeftError::ObjectTombstoned(_))
        ));
    }

    #[test]
    fn cascade_purges_the_subtree_and_releases_content() {
        let weft = weft();
        let root = weft.create_object(text(alice(), "root")).unwrap();
        let child = weft.derive_object(&root.id, text(alice(), "child")).unwrap();
        let grandchild = weft
            .derive_object(&child.id, text(alice(), "grandchild"))
            .unwrap();
        // Already tombstoned members are purged without a second delete.
        weft.delete_object(&alice(), &grandchild.id, DeleteMode::Soft)
            .unwrap();

        let report = weft
            .delete_object(&alice(), &child.id, DeleteMode::Cascade)
            .unwrap();
        assert_eq!(report.tombstoned, vec![child.id]);
        assert_eq!(report.purged, vec![grandchild.id, child.id]);
        assert_eq!(report.released, 2);

        for id in [child.id, grandchild.id] {
            assert!(matches!(
                weft.get_object(&alice(), &id, None),
                Err(WeftError::NotFound(_))
            ));
        }
        let dag = weft.get_dag(&alice(), &root.id, Page::first(10)).unwrap();
        assert_eq!(dag.total, 1);
        let stat = weft.content().stat(&child.content_ref).unwrap().unwrap();
        assert_eq!(stat.ref_count, 0);
    }

    #[test]
    fn writes_are_announced() {
        let weft = weft();
        let mut events = weft.subscribe(EventFilter::owner(alice()));
        let doc = weft.create_object(text(alice(), "a")).unwrap();
        weft.apply_delta(&alice(), &doc.id, append(&alice(), "b"))
            .unwrap();
        weft.delete_object(&alice(), &doc.id, DeleteMode::Soft)
            .unwrap();
        weft.create_object(text(bob(), "not for alice")).unwrap();

        let kinds: Vec<EventType> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            kinds,
            vec![EventType::Created, EventType::Updated, EventType::Deleted]
        );
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[test]
    fn dag_pages_in_parent_first_order() {
        let weft = weft();
        let root = weft.create_object(text(alice(), "r")).unwrap();
        let a = weft.derive_object(&root.id, text(alice(), "a")).unwrap();
        let b = weft.derive_object(&a.id, text(alice(), "b")).unwrap();

        // Any member resolves to the whole family.
        let first = weft.get_dag(&alice(), &b.id, Page::new(0, 2)).unwrap();
        assert_eq!(first.total, 3);
        assert!(first.has_more());
        let ids: Vec<ObjectId> = first.items.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![root.id, a.id]);

        let rest = weft.get_dag(&alice(), &root.id, Page::new(1, 2)).unwrap();
        assert_eq!(rest.items[0].id, b.id);
    }

    #[test]
    fn healthy_object_validates() {
        let weft = weft();
        let doc = weft.create_object(text(alice(), "ok")).unwrap();
        for n in 0..5 {
            weft.apply_delta(&alice(), &doc.id, append(&alice(), &n.to_string()))
                .unwrap();
        }
        let health = weft.validate_object(&alice(), &doc.id).unwrap();
        assert!(health.is_healthy());
    }

    #[test]
    fn propagate_outside_a_runtime_is_internal() {
        let weft = weft();
        let doc = weft.create_object(text(alice(), "x")).unwrap();
        let history = weft.delta_history(&alice(), &doc.id, Page::first(1)).unwrap();
        assert!(matches!(
            weft.propagate(&alice(), &doc.id, &history.items[0].id),
            Err(WeftError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn propagate_hides_other_owners_objects() {
        let weft = weft();
        let doc = weft.create_object(text(alice(), "x")).unwrap();
        let history = weft.delta_history(&alice(), &doc.id, Page::first(1)).unwrap();
        let cause = history.items[0].id;
        assert!(matches!(
            weft.propagate(&bob(), &doc.id, &cause),
            Err(WeftError::NotFound(_))
        ));
        assert_eq!(weft.running_propagations(), 0);

        let handle = weft.propagate(&alice(), &doc.id, &cause).unwrap();
        assert!(handle.join().await.is_ok());
    }
}
