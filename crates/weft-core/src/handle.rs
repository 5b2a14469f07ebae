use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::debug;
use weft_dag::{CancellationReason, CancellationSource, DagResult, PropagationReport};
use weft_types::{DeltaId, ObjectId};

use crate::error::{WeftError, WeftResult};

struct Run {
    id: u64,
    origin: ObjectId,
    root_id: ObjectId,
    source: CancellationSource,
}

/// Propagation runs currently in flight, so deletes and shutdown can
/// cancel them.
#[derive(Default)]
pub(crate) struct RunRegistry {
    next: AtomicU64,
    runs: Mutex<Vec<Run>>,
}

impl RunRegistry {
    pub(crate) fn register(
        &self,
        origin: ObjectId,
        root_id: ObjectId,
        source: CancellationSource,
    ) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.runs.lock().expect("lock poisoned").push(Run {
            id,
            origin,
            root_id,
            source,
        });
        id
    }

    pub(crate) fn finish(&self, id: u64) {
        self.runs.lock().expect("lock poisoned").retain(|run| run.id != id);
    }

    /// Cancel every run whose origin matches. Returns how many were hit.
    pub(crate) fn cancel_origins(&self, origins: &[ObjectId], reason: CancellationReason) -> usize {
        self.cancel_where(|run| origins.contains(&run.origin), reason)
    }

    pub(crate) fn cancel_family(&self, root_id: &ObjectId, reason: CancellationReason) -> usize {
        self.cancel_where(|run| run.root_id == *root_id, reason)
    }

    pub(crate) fn cancel_all(&self, reason: CancellationReason) -> usize {
        self.cancel_where(|_| true, reason)
    }

    pub(crate) fn len(&self) -> usize {
        self.runs.lock().expect("lock poisoned").len()
    }

    fn cancel_where(&self, pred: impl Fn(&Run) -> bool, reason: CancellationReason) -> usize {
        let runs = self.runs.lock().expect("lock poisoned");
        let mut hit = 0;
        for run in runs.iter().filter(|run| pred(run)) {
            if !run.source.is_cancelled() {
                debug!(origin = %run.origin, %reason, "cancelling propagation");
                run.source.cancel(reason.clone());
                hit += 1;
            }
        }
        hit
    }
}

/// Removes a run from the registry however its task ends, including a
/// panic or an abort.
struct FinishOnDrop {
    registry: Arc<RunRegistry>,
    run_id: u64,
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.registry.finish(self.run_id);
    }
}

/// A propagation running in the background.
///
/// Dropping the handle does not stop the run; call [`cancel`](Self::cancel)
/// for that.
pub struct PropagationHandle {
    origin: ObjectId,
    cause: DeltaId,
    source: CancellationSource,
    task: JoinHandle<DagResult<PropagationReport>>,
}

impl PropagationHandle {
    pub(crate) fn spawn(
        runtime: &tokio::runtime::Handle,
        registry: Arc<RunRegistry>,
        run_id: u64,
        origin: ObjectId,
        cause: DeltaId,
        source: CancellationSource,
        run: impl std::future::Future<Output = DagResult<PropagationReport>> + Send + 'static,
    ) -> Self {
        let task = runtime.spawn(async move {
            let _finish = FinishOnDrop { registry, run_id };
            run.await
        });
        Self {
            origin,
            cause,
            source,
            task,
        }
    }

    pub fn origin(&self) -> ObjectId {
        self.origin
    }

    pub fn cause(&self) -> DeltaId {
        self.cause
    }

    /// Stop before the next level. Work already dispatched finishes.
    pub fn cancel(&self, reason: CancellationReason) {
        self.source.cancel(reason);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run and return its report.
    pub async fn join(self) -> WeftResult<PropagationReport> {
        match self.task.await {
            Ok(report) => report.map_err(WeftError::from),
            Err(err) => Err(WeftError::Internal(format!("propagation task failed: {err}"))),
        }
    }
}

impl std::fmt::Debug for PropagationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationHandle")
            .field("origin", &self.origin)
            .field("cause", &self.cause)
            .field("finished", &self.is_finished())
            .finish()
    }
}
