//! Out-of-band maintenance for a [`ContentStore`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::traits::ContentStore;

/// Schedule and thresholds for the reaper task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Time between passes.
    pub interval: Duration,
    /// How long an entry must sit at zero references before removal.
    pub grace: Duration,
    pub warm_after: Duration,
    pub cold_after: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            grace: Duration::from_secs(300),
            warm_after: Duration::from_secs(600),
            cold_after: Duration::from_secs(3600),
        }
    }
}

/// Cumulative counters across all passes of one reaper.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReaperStats {
    pub passes: u64,
    pub reaped: u64,
    pub bytes_freed: u64,
    pub demoted: u64,
    pub errors: u64,
}

/// Background task that collects garbage and demotes idle content.
pub struct Reaper;

impl Reaper {
    /// Spawn the reaper on the current tokio runtime.
    ///
    /// The first pass runs after one full `interval`.
    pub fn spawn(store: Arc<dyn ContentStore>, config: ReaperConfig) -> ReaperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (stats_tx, stats_rx) = watch::channel(ReaperStats::default());

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + config.interval;
            let mut ticker = tokio::time::interval_at(start, config.interval);
            let mut stats = ReaperStats::default();
            info!(interval_ms = config.interval.as_millis() as u64, "content reaper started");

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        Self::run_pass(store.as_ref(), &config, &mut stats);
                        stats_tx.send_replace(stats.clone());
                    }
                }
            }

            info!(passes = stats.passes, reaped = stats.reaped, "content reaper stopped");
            stats
        });

        ReaperHandle {
            stop: Some(stop_tx),
            stats: stats_rx,
            task,
        }
    }

    /// One synchronous maintenance pass.
    pub fn run_pass(store: &dyn ContentStore, config: &ReaperConfig, stats: &mut ReaperStats) {
        stats.passes += 1;
        match store.collect_garbage(config.grace) {
            Ok(report) => {
                stats.reaped += report.reaped.len() as u64;
                stats.bytes_freed += report.bytes_freed;
            }
            Err(err) => {
                stats.errors += 1;
                warn!(%err, "garbage collection pass failed");
            }
        }
        match store.demote_idle(config.warm_after, config.cold_after) {
            Ok(report) => stats.demoted += (report.to_warm + report.to_cold) as u64,
            Err(err) => {
                stats.errors += 1;
                warn!(%err, "tier demotion pass failed");
            }
        }
        debug!(pass = stats.passes, reaped = stats.reaped, "reaper pass complete");
    }
}

/// Handle to a running [`Reaper`].
pub struct ReaperHandle {
    stop: Option<oneshot::Sender<()>>,
    stats: watch::Receiver<ReaperStats>,
    task: JoinHandle<ReaperStats>,
}

impl ReaperHandle {
    /// Counters as of the last completed pass.
    pub fn stats(&self) -> ReaperStats {
        self.stats.borrow().clone()
    }

    /// Stop the task and wait for it, returning the final counters.
    pub async fn shutdown(mut self) -> ReaperStats {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match (&mut self.task).await {
            Ok(stats) => stats,
            Err(err) => {
                warn!(%err, "content reaper task ended abnormally");
                self.stats.borrow().clone()
            }
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}
