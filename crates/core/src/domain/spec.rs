// Job Spec: the action a job performs against one repository

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::{DomainError, Result};

/// Action kind derived from the populated spec field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Sync,
    Migrate,
    Push,
    Pull,
    PullRequest,
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Sync => "sync",
            JobAction::Migrate => "migrate",
            JobAction::Push => "push",
            JobAction::Pull => "pull",
            JobAction::PullRequest => "pr",
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(JobAction::Sync),
            "migrate" => Ok(JobAction::Migrate),
            "push" => Ok(JobAction::Push),
            "pull" => Ok(JobAction::Pull),
            "pr" | "pull_request" | "pullrequest" => Ok(JobAction::PullRequest),
            other => Err(DomainError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobOptions {
    /// Only apply changes since the last synced ref
    #[serde(default)]
    pub incremental: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateJobOptions {
    /// Replay commit history instead of a single snapshot
    #[serde(default)]
    pub history: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushJobOptions {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullJobOptions {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestJobOptions {
    pub number: u64,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Job Spec
///
/// Exactly one of the action fields may be populated; `action()` enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub repository: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncJobOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrate: Option<MigrateJobOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<PushJobOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull: Option<PullJobOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestJobOptions>,
}

impl JobSpec {
    pub fn sync(repository: impl Into<String>, options: SyncJobOptions) -> Self {
        Self {
            repository: repository.into(),
            sync: Some(options),
            ..Default::default()
        }
    }

    pub fn migrate(repository: impl Into<String>, options: MigrateJobOptions) -> Self {
        Self {
            repository: repository.into(),
            migrate: Some(options),
            ..Default::default()
        }
    }

    pub fn push(repository: impl Into<String>, options: PushJobOptions) -> Self {
        Self {
            repository: repository.into(),
            push: Some(options),
            ..Default::default()
        }
    }

    pub fn pull(repository: impl Into<String>, options: PullJobOptions) -> Self {
        Self {
            repository: repository.into(),
            pull: Some(options),
            ..Default::default()
        }
    }

    pub fn pull_request(repository: impl Into<String>, options: PullRequestJobOptions) -> Self {
        Self {
            repository: repository.into(),
            pull_request: Some(options),
            ..Default::default()
        }
    }

    fn populated(&self) -> Vec<JobAction> {
        let mut actions = Vec::new();
        if self.sync.is_some() {
            actions.push(JobAction::Sync);
        }
        if self.migrate.is_some() {
            actions.push(JobAction::Migrate);
        }
        if self.push.is_some() {
            actions.push(JobAction::Push);
        }
        if self.pull.is_some() {
            actions.push(JobAction::Pull);
        }
        if self.pull_request.is_some() {
            actions.push(JobAction::PullRequest);
        }
        actions
    }

    /// The single configured action
    pub fn action(&self) -> Result<JobAction> {
        match self.populated().as_slice() {
            [] => Err(DomainError::NoAction),
            [action] => Ok(*action),
            many => Err(DomainError::MultipleActions(
                many.iter().map(|a| a.to_string()).collect(),
            )),
        }
    }

    /// Validate and derive the deterministic job name for this spec.
    ///
    /// Sync and migrate share the `<repo>-sync` slot since they must never run
    /// concurrently on one repository; pull requests get a slot per PR number.
    pub fn job_name(&self) -> Result<String> {
        if self.repository.trim().is_empty() {
            return Err(DomainError::MissingRepository);
        }
        let name = match self.action()? {
            JobAction::Sync | JobAction::Migrate => format!("{}-sync", self.repository),
            JobAction::PullRequest => {
                let number = self.pull_request.as_ref().map(|pr| pr.number).unwrap_or(0);
                if number == 0 {
                    return Err(DomainError::InvalidPullRequest);
                }
                format!("{}-pr-{}", self.repository, number)
            }
            other => format!("{}-{}", self.repository, other),
        };
        Ok(name)
    }
}
