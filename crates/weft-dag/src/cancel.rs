//! Cooperative cancellation for propagation runs.
//!
//! A [`CancellationSource`] owns the right to cancel; the
//! [`CancellationToken`]s it hands out can only observe. Propagation checks
//! its token between levels, so work already dispatched for a level always
//! finishes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Why a run was cancelled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    /// The caller asked for it.
    Requested,
    /// The origin object (or its family) was deleted.
    ObjectDeleted,
    /// The store is shutting down.
    Shutdown,
    Custom(String),
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::ObjectDeleted => write!(f, "object deleted"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Default)]
struct Shared {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancellationReason>>,
    notify: Notify,
}

/// Read-only view of a cancellation flag.
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    /// A token that is never cancelled.
    pub fn none() -> Self {
        CancellationSource::new().token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<CancellationReason> {
        self.shared.reason.lock().expect("lock poisoned").clone()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.shared.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Owner side of a cancellation flag.
#[derive(Clone, Default)]
pub struct CancellationSource {
    shared: Arc<Shared>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cancel with `reason`. Only the first reason is kept.
    pub fn cancel(&self, reason: CancellationReason) {
        {
            let mut slot = self.shared.reason.lock().expect("lock poisoned");
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tokens_observe_the_source() {
        let source = CancellationSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);

        source.cancel(CancellationReason::Requested);
        assert!(token.is_cancelled());
        assert!(source.token().is_cancelled());
        assert_eq!(token.reason(), Some(CancellationReason::Requested));
    }

    #[test]
    fn first_reason_wins() {
        let source = CancellationSource::new();
        source.cancel(CancellationReason::ObjectDeleted);
        source.cancel(CancellationReason::Custom("later".into()));
        assert_eq!(source.token().reason(), Some(CancellationReason::ObjectDeleted));
        assert_eq!(CancellationReason::ObjectDeleted.to_string(), "object deleted");
    }

    #[test]
    fn none_is_never_cancelled() {
        assert!(!CancellationToken::none().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_wakes_waiters() {
        let source = CancellationSource::new();
        let token = source.token();
        let waiter = tokio::spawn(async move { token.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel(CancellationReason::Shutdown);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_future_is_immediate_after_cancel() {
        let source = CancellationSource::new();
        source.cancel(CancellationReason::Requested);
        tokio::time::timeout(Duration::from_millis(100), source.token().cancelled())
            .await
            .unwrap();
    }
}
