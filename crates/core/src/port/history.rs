// History Writer Port (Interface)

use async_trait::async_trait;

use crate::domain::Job;
use crate::error::Result;

/// Archives finished jobs.
///
/// Callers treat every failure as non-fatal: losing history is acceptable,
/// losing claim release is not. Implementations must be idempotent per job uid.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryWriter: Send + Sync {
    async fn write_job(&self, job: &Job) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::HistoricJob;
    use crate::error::AppError;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Keeps archived jobs in memory, keyed by historic name
    #[derive(Default)]
    pub struct RecordingHistoryWriter {
        jobs: Mutex<BTreeMap<String, HistoricJob>>,
        writes: Mutex<usize>,
        fail: Mutex<bool>,
    }

    impl RecordingHistoryWriter {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent write fail
        pub fn fail_writes(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        pub fn jobs(&self) -> Vec<HistoricJob> {
            self.jobs.lock().unwrap().values().cloned().collect()
        }

        pub fn find_by_original_uid(&self, uid: &str) -> Option<HistoricJob> {
            self.jobs
                .lock()
                .unwrap()
                .values()
                .find(|h| h.original_uid() == Some(uid))
                .cloned()
        }

        /// Number of write attempts, including failed ones
        pub fn write_count(&self) -> usize {
            *self.writes.lock().unwrap()
        }
    }

    #[async_trait]
    impl HistoryWriter for RecordingHistoryWriter {
        async fn write_job(&self, job: &Job) -> Result<()> {
            *self.writes.lock().unwrap() += 1;
            if *self.fail.lock().unwrap() {
                return Err(AppError::Internal("history backend unavailable".into()));
            }
            let historic = HistoricJob::from_job(job);
            self.jobs
                .lock()
                .unwrap()
                .insert(historic.name.clone(), historic);
            Ok(())
        }
    }
}
