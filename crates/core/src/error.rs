// Central Error Type for the Application

use std::time::Duration;
use thiserror::Error;

use crate::port::StoreError;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Nothing claimable right now; callers back off instead of logging an error
    #[error("no jobs available, retry after {retry_after:?}")]
    NoJobs { retry_after: Duration },

    #[error("no worker supports action {action} for job {job}")]
    NoWorker { action: String, job: String },

    #[error("lease lost: {0}")]
    LeaseLost(String),

    #[error("too many errors: {errors} of {processed} processed resources failed")]
    TooManyErrors { errors: usize, processed: usize },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::Store(StoreError::NotFound(_)))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Store(StoreError::Conflict { .. }))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AppError::Store(StoreError::AlreadyExists(_)))
    }

    pub fn is_no_jobs(&self) -> bool {
        matches!(self, AppError::NoJobs { .. })
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
