// Expired Job Cleanup Controller
//
// Independent of the drivers' own cleanup: meant for deployments where the
// history archive and the live queue live on different backends.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::application::driver::constants::{
    CLEANUP_BATCH_SIZE, MAX_EXPIRY_SWEEP_INTERVAL, MIN_EXPIRY_SWEEP_INTERVAL,
};
use crate::application::driver::ShutdownToken;
use crate::application::job_store::{JobStore, SweepStats};
use crate::domain::{Job, JobKey, LEASE_EXPIRED_MESSAGE};
use crate::error::{AppError, Result};
use crate::port::{HistoryWriter, ListSelector};

/// Sweep cadence for a lease expiry: three expiries, clamped to [30s, 5m]
pub fn sweep_interval(expiry: Duration) -> Duration {
    expiry
        .saturating_mul(3)
        .clamp(MIN_EXPIRY_SWEEP_INTERVAL, MAX_EXPIRY_SWEEP_INTERVAL)
}

pub struct ExpiredJobCleanupController {
    store: JobStore,
    history: Option<Arc<dyn HistoryWriter>>,
    expiry: Duration,
}

impl ExpiredJobCleanupController {
    /// Uses the store's lease expiry unless overridden with `with_expiry`
    pub fn new(store: JobStore, history: Option<Arc<dyn HistoryWriter>>) -> Self {
        let expiry = store.lease_expiry();
        Self {
            store,
            history,
            expiry,
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn interval(&self) -> Duration {
        sweep_interval(self.expiry)
    }

    /// Sweep immediately, then on every interval, until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let period = self.interval();
        info!(interval = ?period, expiry = ?self.expiry, "Expired job cleanup started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Expired job cleanup stopped");
                    return Err(AppError::Cancelled);
                }
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(stats) if stats.total() > 0 => info!(
                            reclaimed = stats.reclaimed,
                            skipped = stats.skipped,
                            failed = stats.failed,
                            "Expired job sweep finished"
                        ),
                        Ok(_) => debug!("No expired jobs"),
                        Err(e) => error!(error = %e, "Expired job sweep failed"),
                    }
                }
            }
        }
    }

    /// One pass over every job whose lease expired. Only listing errors are
    /// returned; per-job failures are counted and skipped.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let now = self.store.time_provider().now_millis();
        let cutoff = now - self.expiry.as_millis() as i64;
        let mut stats = SweepStats::default();
        let mut after: Option<JobKey> = None;

        loop {
            let selector = ListSelector::claimed_before(cutoff, CLEANUP_BATCH_SIZE).after(after.take());
            let batch = self.store.records().list(&selector).await?;
            let batch_len = batch.len();

            for job in batch {
                after = Some(job.key());
                self.reclaim(job, now, &mut stats).await;
            }

            if batch_len < CLEANUP_BATCH_SIZE {
                return Ok(stats);
            }
        }
    }

    async fn reclaim(&self, mut job: Job, now: i64, stats: &mut SweepStats) {
        let key = job.key();
        job.fail(LEASE_EXPIRED_MESSAGE, now);
        job.clear_claim();

        match self.store.complete(&job).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() || e.is_conflict() => {
                debug!(job = %key, "Expired job already handled");
                stats.skipped += 1;
                return;
            }
            Err(e) => {
                warn!(job = %key, error = %e, "Failed to complete expired job");
                stats.failed += 1;
                return;
            }
        }
        stats.reclaimed += 1;

        if let Some(history) = &self.history {
            if let Err(e) = history.write_job(&job).await {
                warn!(job = %key, error = %e, "Failed to archive expired job");
            }
        }
    }
}
