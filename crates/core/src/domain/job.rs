// Job Domain Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::error::{DomainError, Result};
use crate::domain::resource::JobResourceSummary;
use crate::domain::spec::JobSpec;

/// Well-known label keys
pub mod labels {
    /// Epoch-millisecond time the current claimant acquired the job
    pub const CLAIM: &str = "provisioning.jobs/claim";
    /// Repository the job acts on
    pub const REPOSITORY: &str = "provisioning.jobs/repository";
    /// Uid of the live job a historic record was archived from
    pub const ORIGINAL_UID: &str = "provisioning.jobs/original-uid";
}

/// Message written to jobs reclaimed after their lease expired
pub const LEASE_EXPIRED_MESSAGE: &str =
    "job lease expired before completion; the worker may have crashed";

/// Job State
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Pending,
    Working,
    Success,
    Error,
    Warning,
}

impl JobState {
    /// Terminal states are never processed again
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Success | JobState::Error | JobState::Warning)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Working => write!(f, "working"),
            JobState::Success => write!(f, "success"),
            JobState::Error => write!(f, "error"),
            JobState::Warning => write!(f, "warning"),
        }
    }
}

/// Job Status, mutated in place by the claimant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default)]
    pub message: String,
    /// In-flight progress percentage; cleared once the job finishes
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub summary: Vec<JobResourceSummary>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub reference: Option<String>,
    pub started: Option<i64>, // epoch ms
    pub finished: Option<i64>,
}

/// Namespaced identity of a job record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub namespace: String,
    pub name: String,
}

impl JobKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(DomainError::InvalidIdentity("namespace is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidIdentity("name is empty".into()));
        }
        Ok(())
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Job Entity
///
/// `version` is owned by the record store: it is bumped on every write and any
/// update carrying a stale version is rejected as a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub created_at: i64, // epoch ms
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

impl Job {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `namespace` - Tenant the job belongs to
    /// * `name` - Deterministic name derived from the spec
    /// * `uid` - Unique id (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `spec` - Action to perform
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
        created_at: i64,
        spec: JobSpec,
    ) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(labels::REPOSITORY.to_string(), spec.repository.clone());
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: uid.into(),
            version: 0,
            labels,
            created_at,
            spec,
            status: JobStatus::default(),
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(&self.namespace, &self.name)
    }

    pub fn repository(&self) -> &str {
        &self.spec.repository
    }

    /// Claim time in epoch ms, if some worker currently owns the job
    pub fn claim_time(&self) -> Option<i64> {
        self.labels
            .get(labels::CLAIM)
            .and_then(|value| value.parse::<i64>().ok())
    }

    pub fn is_claimed(&self) -> bool {
        self.labels.contains_key(labels::CLAIM)
    }

    pub fn set_claim(&mut self, now_millis: i64) {
        self.labels
            .insert(labels::CLAIM.to_string(), now_millis.to_string());
    }

    pub fn clear_claim(&mut self) {
        self.labels.remove(labels::CLAIM);
    }

    /// Mark as Error with an explanatory message and explicit timestamp
    pub fn fail(&mut self, message: impl Into<String>, now_millis: i64) {
        let message = message.into();
        self.status.state = JobState::Error;
        self.status.errors.push(message.clone());
        self.status.message = message;
        self.status.progress = None;
        self.status.finished = Some(now_millis);
    }

    /// Return to the claimable pool
    pub fn reset_to_pending(&mut self) {
        self.clear_claim();
        self.status.state = JobState::Pending;
        self.status.started = None;
        self.status.progress = None;
    }
}
