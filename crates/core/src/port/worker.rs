// Worker Port: domain logic executed once a driver owns a job

use async_trait::async_trait;

use crate::domain::{Job, JobAction, ServiceIdentity};
use crate::error::Result;
use crate::port::ProgressRecorder;

/// Execution context for one claimed job
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Identity limited to the job's own namespace
    pub identity: ServiceIdentity,
    pub action: JobAction,
}

impl JobContext {
    pub fn for_job(job: &Job, action: JobAction) -> Self {
        Self {
            identity: ServiceIdentity::for_namespace(&job.namespace),
            action,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.identity.namespace
    }
}

/// Repository a job acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub namespace: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn for_job(job: &Job) -> Self {
        Self {
            namespace: job.namespace.clone(),
            name: job.spec.repository.clone(),
        }
    }
}

/// Worker trait
///
/// Drivers dispatch to the first registered worker whose `is_supported`
/// returns true.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn is_supported(&self, job: &Job) -> bool;

    async fn process(
        &self,
        ctx: &JobContext,
        repo: &RepositoryRef,
        job: &Job,
        progress: &mut dyn ProgressRecorder,
    ) -> Result<()>;
}
