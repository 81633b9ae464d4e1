// Domain Layer - Pure business logic and entities

pub mod error;
pub mod history;
pub mod identity;
pub mod job;
pub mod resource;
pub mod spec;

// Re-exports
pub use error::DomainError;
pub use history::HistoricJob;
pub use identity::ServiceIdentity;
pub use job::{labels, Job, JobKey, JobState, JobStatus, LEASE_EXPIRED_MESSAGE};
pub use resource::{JobResourceResult, JobResourceSummary, ResourceAction};
pub use spec::{
    JobAction, JobSpec, MigrateJobOptions, PullJobOptions, PullRequestJobOptions, PushJobOptions,
    SyncJobOptions,
};
