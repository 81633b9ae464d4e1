// Job Record Store: claim/release protocol over a versioned record store
//
// No in-process lock guards job records. Drivers may live in separate
// processes, so every transition is a version-guarded write and a Conflict
// simply means another actor got there first.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::application::driver::constants::{
    CLAIM_PAGE_SIZE, CLEANUP_BATCH_SIZE, DEFAULT_LEASE_EXPIRY, NO_JOBS_RETRY_AFTER,
    ROLLBACK_TIMEOUT,
};
use crate::application::wake::WakeSignal;
use crate::domain::{Job, JobKey, JobSpec, JobState, LEASE_EXPIRED_MESSAGE};
use crate::error::{AppError, Result};
use crate::port::{HistoryWriter, IdProvider, ListSelector, RecordStore, StoreError, TimeProvider};

/// Outcome counters of one expired-lease sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Failed with the lease-expiry message and completed
    pub reclaimed: usize,
    /// Already handled by a concurrent actor (gone or changed)
    pub skipped: usize,
    /// Per-item failures that were logged and passed over
    pub failed: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.reclaimed + self.skipped + self.failed
    }
}

/// Persistent job store
#[derive(Clone)]
pub struct JobStore {
    records: Arc<dyn RecordStore>,
    history: Option<Arc<dyn HistoryWriter>>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    wake: WakeSignal,
    lease_expiry: Duration,
}

impl JobStore {
    pub fn new(
        records: Arc<dyn RecordStore>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            records,
            history: None,
            time_provider,
            id_provider,
            wake: WakeSignal::new(),
            lease_expiry: DEFAULT_LEASE_EXPIRY,
        }
    }

    /// Archive completed jobs through `history`
    pub fn with_history(mut self, history: Arc<dyn HistoryWriter>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_lease_expiry(mut self, expiry: Duration) -> Self {
        self.lease_expiry = expiry;
        self
    }

    /// Share a wake signal with drivers created elsewhere
    pub fn with_wake(mut self, wake: WakeSignal) -> Self {
        self.wake = wake;
        self
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn time_provider(&self) -> &Arc<dyn TimeProvider> {
        &self.time_provider
    }

    /// Fired on every insert and every released claim
    pub fn wake(&self) -> &WakeSignal {
        &self.wake
    }

    pub fn lease_expiry(&self) -> Duration {
        self.lease_expiry
    }

    fn no_jobs() -> AppError {
        AppError::NoJobs {
            retry_after: NO_JOBS_RETRY_AFTER,
        }
    }

    /// Claim the first available job.
    ///
    /// Returns the claimed job and a guard that puts it back into the pool
    /// unless disarmed after a successful `complete`.
    pub async fn claim(&self) -> Result<(Job, ClaimGuard)> {
        let candidates = self
            .records
            .list(&ListSelector::unclaimed(CLAIM_PAGE_SIZE))
            .await?;
        if candidates.is_empty() {
            return Err(Self::no_jobs());
        }

        for mut job in candidates {
            let now = self.time_provider.now_millis();
            job.set_claim(now);
            job.status.state = JobState::Working;
            job.status.started = Some(now);

            match self.records.update(&job).await {
                Ok(claimed) => {
                    debug!(job = %claimed.key(), "Job claimed");
                    let guard = ClaimGuard::new(self.clone(), &claimed);
                    return Ok((claimed, guard));
                }
                Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound(_)) => {
                    debug!(job = %job.key(), "Job taken by another worker, trying next");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Self::no_jobs())
    }

    /// Version-guarded write of a claimed job's current state
    pub async fn update(&self, job: &Job) -> Result<Job> {
        job.key().validate()?;
        Ok(self.records.update(job).await?)
    }

    /// Delete the live record, then archive it.
    ///
    /// A failed delete is returned to the caller; a failed archive is only
    /// logged.
    pub async fn complete(&self, job: &Job) -> Result<()> {
        self.records.delete(&job.key(), Some(job.version)).await?;

        if let Some(history) = &self.history {
            let mut archived = job.clone();
            archived.clear_claim();
            if let Err(e) = history.write_job(&archived).await {
                warn!(job = %job.key(), error = %e, "Failed to archive completed job");
            }
        }
        Ok(())
    }

    /// Refresh the claim timestamp of a job this caller still owns.
    ///
    /// Fails with `LeaseLost` if the job is unclaimed, gone, or changed hands.
    /// On success the caller's copy carries the new claim and version.
    pub async fn renew_lease(&self, job: &mut Job) -> Result<()> {
        let claimed_at = job
            .claim_time()
            .ok_or_else(|| AppError::LeaseLost(format!("job {} is not claimed", job.key())))?;

        let mut latest = match self.records.get(&job.key()).await {
            Ok(latest) => latest,
            Err(StoreError::NotFound(key)) => {
                return Err(AppError::LeaseLost(format!("job {} no longer exists", key)))
            }
            Err(e) => return Err(e.into()),
        };

        if latest.uid != job.uid
            || latest.claim_time() != Some(claimed_at)
            || latest.status.state != job.status.state
        {
            return Err(AppError::LeaseLost(format!(
                "job {} was claimed by another worker",
                job.key()
            )));
        }

        latest.set_claim(self.time_provider.now_millis());
        let renewed = match self.records.update(&latest).await {
            Ok(renewed) => renewed,
            Err(StoreError::Conflict { key, .. }) | Err(StoreError::NotFound(key)) => {
                return Err(AppError::LeaseLost(format!(
                    "job {} changed while renewing its lease",
                    key
                )))
            }
            Err(e) => return Err(e.into()),
        };

        job.labels = renewed.labels;
        job.version = renewed.version;
        debug!(job = %job.key(), "Lease renewed");
        Ok(())
    }

    /// Fail and complete every job whose claim is older than the lease expiry
    pub async fn cleanup(&self) -> Result<SweepStats> {
        let now = self.time_provider.now_millis();
        let cutoff = now - self.lease_expiry.as_millis() as i64;
        let mut stats = SweepStats::default();
        let mut after: Option<JobKey> = None;

        loop {
            let batch = self
                .records
                .list(&ListSelector::claimed_before(cutoff, CLEANUP_BATCH_SIZE).after(after.take()))
                .await?;
            let batch_len = batch.len();

            for mut job in batch {
                after = Some(job.key());
                job.fail(LEASE_EXPIRED_MESSAGE, now);

                match self.complete(&job).await {
                    Ok(()) => {
                        info!(job = %job.key(), "Reclaimed job with expired lease");
                        stats.reclaimed += 1;
                    }
                    Err(e) if e.is_not_found() || e.is_conflict() => {
                        debug!(job = %job.key(), "Expired job already handled");
                        stats.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            if batch_len < CLEANUP_BATCH_SIZE {
                break;
            }
        }

        if stats.total() > 0 {
            info!(
                reclaimed = stats.reclaimed,
                skipped = stats.skipped,
                "Expired lease cleanup finished"
            );
        }
        Ok(stats)
    }

    /// Create a pending job for `spec` and wake idle drivers.
    ///
    /// The derived name makes a second outstanding job of the same kind for
    /// the same repository fail with AlreadyExists.
    pub async fn insert(&self, namespace: &str, spec: JobSpec) -> Result<Job> {
        let action = spec.action()?;
        let name = spec.job_name()?;
        let key = JobKey::new(namespace, &name);
        key.validate()?;

        let job = Job::new(
            namespace,
            name,
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            spec,
        );
        let created = self.records.create(&job).await?;
        info!(job = %key, action = %action, "Job inserted");

        self.wake.notify();
        Ok(created)
    }

    /// Return a claimed job to Pending. Best effort: any failure is left to
    /// the lease expiry sweep.
    async fn release_claim(&self, key: &JobKey, uid: &str) {
        let attempt = async {
            let mut job = match self.records.get(key).await {
                Ok(job) => job,
                Err(StoreError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e),
            };
            if job.uid != uid || !job.is_claimed() {
                return Ok(false);
            }
            job.reset_to_pending();
            self.records.update(&job).await.map(|_| true)
        };

        match tokio::time::timeout(ROLLBACK_TIMEOUT, attempt).await {
            Ok(Ok(true)) => {
                debug!(job = %key, "Claim rolled back");
                self.wake.notify();
            }
            Ok(Ok(false)) => debug!(job = %key, "Nothing to roll back, job already gone"),
            Ok(Err(StoreError::Conflict { .. })) | Ok(Err(StoreError::NotFound(_))) => {
                debug!(job = %key, "Job changed before rollback; leaving it alone")
            }
            Ok(Err(e)) => {
                warn!(job = %key, error = %e, "Failed to roll back claim; lease expiry will reclaim it")
            }
            Err(_) => warn!(
                job = %key,
                timeout = ?ROLLBACK_TIMEOUT,
                "Claim rollback timed out; lease expiry will reclaim it"
            ),
        }
    }
}

/// Release guard returned by [`JobStore::claim`].
///
/// Dropping an armed guard releases the claim on a detached task, so the
/// release still runs when the caller was cancelled or panicked.
#[must_use = "dropping the guard immediately releases the claim"]
pub struct ClaimGuard {
    store: Option<JobStore>,
    key: JobKey,
    uid: String,
}

impl ClaimGuard {
    fn new(store: JobStore, job: &Job) -> Self {
        Self {
            store: Some(store),
            key: job.key(),
            uid: job.uid.clone(),
        }
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn is_armed(&self) -> bool {
        self.store.is_some()
    }

    /// Keep the claim as is (the job was completed)
    pub fn disarm(mut self) {
        self.store = None;
    }

    /// Release the claim now and wait for the outcome
    pub async fn rollback(mut self) {
        if let Some(store) = self.store.take() {
            let key = self.key.clone();
            let uid = self.uid.clone();
            // Detached so cancelling the caller cannot abort the release
            let handle = tokio::spawn(async move { store.release_claim(&key, &uid).await });
            if let Err(e) = handle.await {
                warn!(job = %self.key, error = %e, "Claim rollback task failed");
            }
        }
    }
}

impl fmt::Debug for ClaimGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimGuard")
            .field("key", &self.key)
            .field("uid", &self.uid)
            .field("armed", &self.is_armed())
            .finish()
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let key = self.key.clone();
                let uid = std::mem::take(&mut self.uid);
                runtime.spawn(async move { store.release_claim(&key, &uid).await });
            }
            Err(_) => warn!(
                job = %self.key,
                "No runtime to roll back claim; lease expiry will reclaim it"
            ),
        }
    }
}
