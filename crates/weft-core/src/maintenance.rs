use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use weft_content::{ReapReport, Reaper, ReaperHandle, TierReport};

use crate::error::{WeftError, WeftResult};
use crate::weft::Weft;

/// What one maintenance pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub reaped: ReapReport,
    pub tiers: TierReport,
    /// Stale DAG views dropped from the cache.
    pub evicted_views: usize,
}

impl Weft {
    /// Reap unreferenced content past its grace period, demote idle
    /// content and drop expired DAG views.
    pub fn run_maintenance(&self) -> WeftResult<MaintenanceReport> {
        let config = &self.inner.config;
        let reaped = self.content().collect_garbage(config.gc_grace_period())?;
        let tiers = self.content().demote_idle(
            Duration::from_millis(config.content.warm_after_ms),
            Duration::from_millis(config.content.cold_after_ms),
        )?;
        let evicted_views = self.inner.dag_cache.evict_expired();
        info!(
            reaped = reaped.reaped.len(),
            bytes_freed = reaped.bytes_freed,
            deferred = reaped.deferred,
            demoted = tiers.to_warm + tiers.to_cold,
            evicted_views,
            "maintenance pass complete"
        );
        Ok(MaintenanceReport {
            reaped,
            tiers,
            evicted_views,
        })
    }

    /// Run content maintenance periodically in the background. Must be
    /// called from within a tokio runtime.
    pub fn start_reaper(&self) -> WeftResult<ReaperHandle> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| WeftError::Internal(format!("reaper needs a tokio runtime: {e}")))?;
        Ok(Reaper::spawn(
            Arc::clone(self.content()),
            self.inner.config.reaper_config(),
        ))
    }
}
