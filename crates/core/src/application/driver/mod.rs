// Job Driver - claim -> process -> complete loop

mod claimed;
pub mod concurrent;
pub mod constants;
mod panic_guard;
pub mod settings;
mod shutdown;

pub use claimed::ClaimedJob;
pub use concurrent::ConcurrentJobDriver;
pub use panic_guard::guard_panics;
pub use settings::DriverSettings;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::application::expiry::ExpiredJobCleanupController;
use crate::application::job_store::{ClaimGuard, JobStore, SweepStats};
use crate::application::progress::JobProgressRecorder;
use crate::domain::{Job, JobAction};
use crate::error::{AppError, Result};
use crate::port::{HistoryWriter, JobContext, RepositoryRef, TimeProvider, Worker};
use constants::FINALIZE_TIMEOUT;

/// Something the concurrent driver can run until shutdown or failure
#[async_trait]
pub trait DriverLoop: Send + Sync {
    /// Returns `Err(Cancelled)` on shutdown, any other error is fatal
    async fn run(&self, shutdown: ShutdownToken) -> Result<()>;
}

/// Single-process driver
pub struct JobDriver {
    settings: DriverSettings,
    store: JobStore,
    history: Option<Arc<dyn HistoryWriter>>,
    workers: Vec<Arc<dyn Worker>>,
    time_provider: Arc<dyn TimeProvider>,
    run_cleanup: bool,
}

impl JobDriver {
    /// Create a driver dispatching to `workers` in order (first match wins)
    pub fn new(
        settings: DriverSettings,
        store: JobStore,
        workers: Vec<Arc<dyn Worker>>,
    ) -> Result<Self> {
        settings.validate()?;
        let time_provider = store.time_provider().clone();
        Ok(Self {
            settings,
            store,
            history: None,
            workers,
            time_provider,
            run_cleanup: true,
        })
    }

    /// Archive finished jobs through `history` before completing them
    pub fn with_history(mut self, history: Arc<dyn HistoryWriter>) -> Self {
        self.history = Some(history);
        self
    }

    /// Disable the driver's own cleanup timer (a shared one runs elsewhere)
    pub fn without_cleanup(mut self) -> Self {
        self.run_cleanup = false;
        self
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Wait on the cleanup timer, the poll timer and the wake signal until
    /// shutdown, draining the queue on every poll or wake
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(workers = self.workers.len(), "Job driver started");

        let mut poll = tokio::time::interval(self.settings.job_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cleanup = tokio::time::interval(self.settings.cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Job driver stopped");
                    return Err(AppError::Cancelled);
                }
                _ = cleanup.tick(), if self.run_cleanup => {
                    if let Err(e) = cleanup_expired(&self.store, self.history.as_ref()).await {
                        error!(error = %e, "Failed to clean up expired jobs");
                    }
                    continue;
                }
                _ = poll.tick() => {}
                _ = self.store.wake().notified() => {}
            }

            self.drive(&shutdown).await;
        }
    }

    /// Process jobs until none is left, shutdown, or an error ends the cycle
    async fn drive(&self, shutdown: &ShutdownToken) {
        loop {
            if shutdown.is_shutdown() {
                return;
            }
            match self.claim_and_process(shutdown).await {
                Ok(()) => {}
                Err(AppError::NoJobs { retry_after }) => {
                    debug!(retry_after = ?retry_after, "No jobs to process");
                    return;
                }
                Err(AppError::Cancelled) => {
                    debug!("Job cycle cancelled");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Job cycle failed");
                    return;
                }
            }
        }
    }

    async fn claim_and_process(&self, shutdown: &ShutdownToken) -> Result<()> {
        let (job, guard) = self.store.claim().await?;
        let span = info_span!("job", job = %job.key(), repository = %job.repository());
        self.process_claimed(job, guard, shutdown.clone())
            .instrument(span)
            .await
    }

    fn select_worker(&self, job: &Job) -> Result<(Arc<dyn Worker>, JobAction)> {
        let action = job.spec.action()?;
        self.workers
            .iter()
            .find(|worker| worker.is_supported(job))
            .map(|worker| (Arc::clone(worker), action))
            .ok_or_else(|| AppError::NoWorker {
                action: action.to_string(),
                job: job.key().to_string(),
            })
    }

    async fn process_claimed(
        &self,
        job: Job,
        guard: ClaimGuard,
        shutdown: ShutdownToken,
    ) -> Result<()> {
        let started = Instant::now();
        let claimed = Arc::new(ClaimedJob::new(self.store.clone(), job.clone()));
        let mut recorder = JobProgressRecorder::new(claimed.clone(), self.time_provider.clone())
            .with_notify_interval(self.settings.progress_notify_interval);

        let outcome = match self.select_worker(&job) {
            Ok((worker, action)) => {
                info!(worker = worker.name(), action = %action, "Processing job");
                self.run_worker(worker, action, &job, &claimed, &mut recorder, shutdown)
                    .await
            }
            Err(e) => Err(e),
        };

        let err = match outcome {
            Ok(()) => None,
            Err(AppError::Cancelled) => {
                info!("Shutdown while processing; returning job to the queue");
                guard.rollback().await;
                return Err(AppError::Cancelled);
            }
            Err(e @ AppError::LeaseLost(_)) => {
                // Someone else owns the job now; completing or rolling back would clobber it
                warn!(error = %e, "Abandoning job");
                guard.disarm();
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Job processing failed");
                Some(e)
            }
        };

        let mut job = claimed.snapshot().await;
        job.status = recorder.complete(err.as_ref());

        match tokio::time::timeout(FINALIZE_TIMEOUT, self.finalize(&job)).await {
            Ok(Ok(())) => {
                guard.disarm();
                info!(
                    state = %job.status.state,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job finished"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                guard.rollback().await;
                Err(e)
            }
            Err(_) => {
                guard.rollback().await;
                Err(AppError::Timeout(FINALIZE_TIMEOUT))
            }
        }
    }

    /// Run the worker with a timeout, renewing the lease alongside.
    ///
    /// Renewal is stopped between ticks and drained before returning, so the
    /// claimant's copy always carries the version of the last renewal write.
    async fn run_worker(
        &self,
        worker: Arc<dyn Worker>,
        action: JobAction,
        job: &Job,
        claimed: &ClaimedJob,
        recorder: &mut JobProgressRecorder,
        mut shutdown: ShutdownToken,
    ) -> Result<()> {
        let ctx = JobContext::for_job(job, action);
        let repo = RepositoryRef::for_job(job);
        let work = tokio::time::timeout(
            self.settings.job_timeout,
            guard_panics(worker.process(&ctx, &repo, job, recorder)),
        );

        let stop = Notify::new();
        let renewal = self.keep_lease(claimed, &stop);
        tokio::pin!(renewal);

        let outcome = tokio::select! {
            outcome = work => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(panic_msg)) => Err(AppError::WorkerPanicked(panic_msg)),
                Err(_) => Err(AppError::Timeout(self.settings.job_timeout)),
            },
            Some(lost) = &mut renewal => return Err(lost),
            _ = shutdown.wait() => Err(AppError::Cancelled),
        };

        stop.notify_one();
        match renewal.await {
            Some(lost) => Err(lost),
            None => outcome,
        }
    }

    /// Renew the claim periodically until `stop` fires between renewals.
    /// Returns the error once the lease is lost.
    async fn keep_lease(&self, claimed: &ClaimedJob, stop: &Notify) -> Option<AppError> {
        let period = self.settings.lease_renewal_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.notified() => return None,
                _ = ticker.tick() => {}
            }
            match claimed.renew_lease().await {
                Ok(()) => {}
                Err(e @ AppError::LeaseLost(_)) => return Some(e),
                Err(e) => warn!(error = %e, "Failed to renew lease, retrying"),
            }
        }
    }

    /// Archive a copy, then release the claim by completing the job
    async fn finalize(&self, job: &Job) -> Result<()> {
        if let Some(history) = &self.history {
            let mut archived = job.clone();
            archived.clear_claim();
            if let Err(e) = history.write_job(&archived).await {
                warn!(error = %e, "Failed to write job to history");
            }
        }
        self.store.complete(job).await
    }
}

/// One cleanup pass. With a driver-side archive the sweep writes expired
/// jobs to it, the store alone would drop them.
pub(crate) async fn cleanup_expired(
    store: &JobStore,
    history: Option<&Arc<dyn HistoryWriter>>,
) -> Result<SweepStats> {
    match history {
        Some(history) => {
            ExpiredJobCleanupController::new(store.clone(), Some(Arc::clone(history)))
                .sweep()
                .await
        }
        None => store.cleanup().await,
    }
}

#[async_trait]
impl DriverLoop for JobDriver {
    async fn run(&self, shutdown: ShutdownToken) -> Result<()> {
        JobDriver::run(self, shutdown).await
    }
}
