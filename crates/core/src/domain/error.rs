// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("job spec is missing the repository name")]
    MissingRepository,

    #[error("job spec has no action configured")]
    NoAction,

    #[error("job spec has multiple actions configured: {}", .0.join(", "))]
    MultipleActions(Vec<String>),

    #[error("pull request number must be positive")]
    InvalidPullRequest,

    #[error("unknown job action: {0}")]
    UnknownAction(String),

    #[error("invalid job identity: {0}")]
    InvalidIdentity(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
