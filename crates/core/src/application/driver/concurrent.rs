// Concurrent Job Driver: N drivers plus one shared cleanup loop

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, Instrument};

use super::{
    cleanup_expired, shutdown_channel, DriverLoop, DriverSettings, JobDriver, ShutdownToken,
};
use crate::application::job_store::JobStore;
use crate::error::{AppError, Result};
use crate::port::{HistoryWriter, Worker};

pub struct ConcurrentJobDriver {
    drivers: Vec<Arc<dyn DriverLoop>>,
    store: JobStore,
    settings: DriverSettings,
    history: Option<Arc<dyn HistoryWriter>>,
}

impl ConcurrentJobDriver {
    /// Build `num_drivers` job drivers sharing one store and worker list
    pub fn new(
        num_drivers: usize,
        settings: DriverSettings,
        store: JobStore,
        workers: Vec<Arc<dyn Worker>>,
        history: Option<Arc<dyn HistoryWriter>>,
    ) -> Result<Self> {
        Self::check(num_drivers, &settings)?;

        let mut drivers: Vec<Arc<dyn DriverLoop>> = Vec::with_capacity(num_drivers);
        for _ in 0..num_drivers {
            let mut driver =
                JobDriver::new(settings.clone(), store.clone(), workers.clone())?.without_cleanup();
            if let Some(history) = &history {
                driver = driver.with_history(history.clone());
            }
            drivers.push(Arc::new(driver));
        }
        Ok(Self {
            drivers,
            store,
            settings,
            history,
        })
    }

    /// Group prebuilt driver loops
    pub fn from_drivers(
        drivers: Vec<Arc<dyn DriverLoop>>,
        store: JobStore,
        settings: DriverSettings,
    ) -> Result<Self> {
        Self::check(drivers.len(), &settings)?;
        Ok(Self {
            drivers,
            store,
            settings,
            history: None,
        })
    }

    fn check(num_drivers: usize, settings: &DriverSettings) -> Result<()> {
        if num_drivers == 0 {
            return Err(AppError::Config(
                "at least one job driver is required".into(),
            ));
        }
        settings.validate()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Run every driver and the shared cleanup until shutdown or the first
    /// fatal error, which stops the whole group and is returned.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(drivers = self.drivers.len(), "Starting concurrent job drivers");

        let (group_tx, group_token) = shutdown_channel();
        let (err_tx, mut err_rx) = mpsc::channel::<AppError>(self.drivers.len() + 1);
        let mut tasks = JoinSet::new();

        {
            let store = self.store.clone();
            let history = self.history.clone();
            let period = self.settings.cleanup_interval;
            let mut token = group_token.clone();
            let err_tx = err_tx.clone();
            tasks.spawn(
                async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            _ = token.wait() => return,
                            _ = ticker.tick() => {
                                if let Err(e) = cleanup_expired(&store, history.as_ref()).await {
                                    error!(error = %e, "Failed to clean up expired jobs");
                                    let _ = err_tx.try_send(e);
                                    return;
                                }
                            }
                        }
                    }
                }
                .instrument(info_span!("cleanup")),
            );
        }

        for (index, driver) in self.drivers.iter().enumerate() {
            let driver = Arc::clone(driver);
            let token = group_token.clone();
            let err_tx = err_tx.clone();
            tasks.spawn(
                async move {
                    match driver.run(token).await {
                        Ok(()) | Err(AppError::Cancelled) => {}
                        Err(e) => {
                            error!(error = %e, "Job driver failed");
                            let _ = err_tx.try_send(e);
                        }
                    }
                }
                .instrument(info_span!("driver", driver = index)),
            );
        }
        drop(err_tx);

        let result = tokio::select! {
            _ = shutdown.wait() => Err(AppError::Cancelled),
            first = err_rx.recv() => Err(first.unwrap_or(AppError::Cancelled)),
        };

        group_tx.shutdown();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!(error = %e, "Job driver task panicked");
                }
            }
        }

        info!("Concurrent job drivers stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobSpec, JobState, SyncJobOptions, LEASE_EXPIRED_MESSAGE};
    use crate::port::history::mocks::RecordingHistoryWriter;
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::record_store::mocks::{InMemoryRecordStore, Op};
    use crate::port::time_provider::MockTimeProvider;
    use crate::port::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct IdleLoop {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DriverLoop for IdleLoop {
        async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
            shutdown.wait().await;
            self.stopped.store(true, Ordering::SeqCst);
            Err(AppError::Cancelled)
        }
    }

    struct FailingLoop;

    #[async_trait]
    impl DriverLoop for FailingLoop {
        async fn run(&self, _shutdown: ShutdownToken) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(AppError::Internal("driver broke".into()))
        }
    }

    fn store(records: Arc<InMemoryRecordStore>, clock: Arc<MockTimeProvider>) -> JobStore {
        JobStore::new(records, clock, Arc::new(SequentialIdProvider::default()))
            .with_lease_expiry(Duration::from_secs(30))
    }

    fn default_store() -> JobStore {
        store(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(MockTimeProvider::new(0)),
        )
    }

    #[test]
    fn test_rejects_zero_drivers() {
        let result = ConcurrentJobDriver::new(
            0,
            DriverSettings::default(),
            default_store(),
            vec![],
            None,
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_cleanup_not_exceeding_timeout() {
        let settings = DriverSettings {
            job_timeout: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(5),
            ..Default::default()
        };
        let result = ConcurrentJobDriver::new(2, settings, default_store(), vec![], None);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_builds_requested_driver_count() {
        let group =
            ConcurrentJobDriver::new(3, DriverSettings::default(), default_store(), vec![], None)
                .unwrap();
        assert_eq!(group.len(), 3);
    }

    #[tokio::test]
    async fn test_first_error_stops_the_group() {
        let stopped = Arc::new(AtomicBool::new(false));
        let drivers: Vec<Arc<dyn DriverLoop>> = vec![
            Arc::new(IdleLoop {
                stopped: stopped.clone(),
            }),
            Arc::new(FailingLoop),
        ];
        let group =
            ConcurrentJobDriver::from_drivers(drivers, default_store(), DriverSettings::default())
                .unwrap();

        let (_tx, token) = shutdown_channel();
        let result = tokio::time::timeout(Duration::from_secs(5), group.run(token))
            .await
            .expect("group should stop on the first error");

        assert!(matches!(result, Err(AppError::Internal(msg)) if msg == "driver broke"));
        assert!(stopped.load(Ordering::SeqCst), "healthy driver should be stopped");
    }

    #[tokio::test]
    async fn test_outer_shutdown_returns_cancelled() {
        let stopped = Arc::new(AtomicBool::new(false));
        let drivers: Vec<Arc<dyn DriverLoop>> = vec![Arc::new(IdleLoop {
            stopped: stopped.clone(),
        })];
        let group =
            ConcurrentJobDriver::from_drivers(drivers, default_store(), DriverSettings::default())
                .unwrap();

        let (tx, token) = shutdown_channel();
        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.shutdown();
        };
        let (result, _) = tokio::join!(group.run(token), stop);

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shared_cleanup_reclaims_expired_jobs() {
        let records = Arc::new(InMemoryRecordStore::new());
        let clock = Arc::new(MockTimeProvider::new(0));
        let store = store(records.clone(), clock.clone());
        store
            .insert("ns", JobSpec::sync("repo", SyncJobOptions::default()))
            .await
            .unwrap();
        let (_, guard) = store.claim().await.unwrap();
        guard.disarm();
        clock.advance_millis(60_000);

        let drivers: Vec<Arc<dyn DriverLoop>> = vec![Arc::new(IdleLoop {
            stopped: Arc::new(AtomicBool::new(false)),
        })];
        let group =
            ConcurrentJobDriver::from_drivers(drivers, store, DriverSettings::default()).unwrap();

        let (tx, token) = shutdown_channel();
        let watch = async {
            for _ in 0..100 {
                if records.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tx.shutdown();
        };
        let (result, _) = tokio::join!(group.run(token), watch);

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_shared_cleanup_archives_with_driver_history() {
        // The store itself has no archive, as in split history mode
        let records = Arc::new(InMemoryRecordStore::new());
        let clock = Arc::new(MockTimeProvider::new(0));
        let store = store(records.clone(), clock.clone());
        let history = Arc::new(RecordingHistoryWriter::new());
        let job = store
            .insert("ns", JobSpec::sync("repo", SyncJobOptions::default()))
            .await
            .unwrap();
        let (_, guard) = store.claim().await.unwrap();
        guard.disarm();
        clock.advance_millis(60_000);

        let group = ConcurrentJobDriver::new(
            1,
            DriverSettings::default(),
            store,
            vec![],
            Some(history.clone()),
        )
        .unwrap();

        let (tx, token) = shutdown_channel();
        let watch = async {
            for _ in 0..100 {
                if history.write_count() > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tx.shutdown();
        };
        let (result, _) = tokio::join!(group.run(token), watch);

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(records.is_empty());
        let archived = history.find_by_original_uid(&job.uid).unwrap();
        assert_eq!(archived.status.state, JobState::Error);
        assert_eq!(archived.status.message, LEASE_EXPIRED_MESSAGE);
    }

    #[tokio::test]
    async fn test_cleanup_failure_stops_the_group() {
        let records = Arc::new(InMemoryRecordStore::new());
        records.fail_next(Op::List, StoreError::Backend("disk gone".into()));
        let stopped = Arc::new(AtomicBool::new(false));
        let drivers: Vec<Arc<dyn DriverLoop>> = vec![Arc::new(IdleLoop {
            stopped: stopped.clone(),
        })];
        let group = ConcurrentJobDriver::from_drivers(
            drivers,
            store(records, Arc::new(MockTimeProvider::new(0))),
            DriverSettings::default(),
        )
        .unwrap();

        let (_tx, token) = shutdown_channel();
        let result = tokio::time::timeout(Duration::from_secs(5), group.run(token))
            .await
            .expect("group should stop when cleanup fails");

        assert!(matches!(
            result,
            Err(AppError::Store(StoreError::Backend(msg))) if msg == "disk gone"
        ));
        assert!(stopped.load(Ordering::SeqCst), "driver should be stopped");
    }
}
