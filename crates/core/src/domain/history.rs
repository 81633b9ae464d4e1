// Historic Job: immutable archive copy of a finished job

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::job::{labels, Job, JobStatus};
use crate::domain::spec::JobSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricJob {
    pub namespace: String,
    /// `<job-name>-<uid>`, stable so repeated archival of one job is idempotent
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub created_at: i64,
    pub spec: JobSpec,
    pub status: JobStatus,
}

impl HistoricJob {
    /// Archive a job: drop the claim label, record the original identity
    pub fn from_job(job: &Job) -> Self {
        let mut labels = job.labels.clone();
        labels.remove(labels::CLAIM);
        labels.insert(labels::ORIGINAL_UID.to_string(), job.uid.clone());
        labels.insert(labels::REPOSITORY.to_string(), job.spec.repository.clone());

        Self {
            namespace: job.namespace.clone(),
            name: format!("{}-{}", job.name, job.uid),
            labels,
            created_at: job.created_at,
            spec: job.spec.clone(),
            status: job.status.clone(),
        }
    }

    pub fn original_uid(&self) -> Option<&str> {
        self.labels.get(labels::ORIGINAL_UID).map(String::as_str)
    }

    pub fn repository(&self) -> &str {
        &self.spec.repository
    }
}
