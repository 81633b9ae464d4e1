// The driver's handle on one claimed job
//
// Progress writes and lease renewals both bump the record version, so they
// go through one lock holding the latest stored copy.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::application::job_store::JobStore;
use crate::application::progress::ProgressNotifier;
use crate::domain::{Job, JobStatus};
use crate::error::Result;

pub struct ClaimedJob {
    store: JobStore,
    job: Mutex<Job>,
}

impl ClaimedJob {
    pub fn new(store: JobStore, job: Job) -> Self {
        Self {
            store,
            job: Mutex::new(job),
        }
    }

    /// Latest copy as last written by this claimant
    pub async fn snapshot(&self) -> Job {
        self.job.lock().await.clone()
    }

    pub async fn renew_lease(&self) -> Result<()> {
        let mut job = self.job.lock().await;
        self.store.renew_lease(&mut job).await
    }
}

#[async_trait]
impl ProgressNotifier for ClaimedJob {
    async fn notify(&self, status: JobStatus) -> Result<()> {
        let mut job = self.job.lock().await;
        let mut next = job.clone();
        next.status = status;
        *job = self.store.update(&next).await?;
        Ok(())
    }
}
