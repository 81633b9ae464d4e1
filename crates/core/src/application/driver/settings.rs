// Driver configuration (constructor parameters, no global state)

use std::time::Duration;

use super::constants::*;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    /// Upper bound for one claimed job (claim -> process -> complete)
    pub job_timeout: Duration,
    /// How often an idle driver re-scans without being woken
    pub job_poll_interval: Duration,
    /// Cadence of the shared expired-lease cleanup; must exceed `job_timeout`
    pub cleanup_interval: Duration,
    /// Claim age after which a job counts as abandoned
    pub lease_expiry: Duration,
    /// How often a running job's claim is refreshed; must be below `lease_expiry`
    pub lease_renewal_interval: Duration,
    /// Minimum delay between intermediate progress writes
    pub progress_notify_interval: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            job_timeout: DEFAULT_JOB_TIMEOUT,
            job_poll_interval: DEFAULT_JOB_POLL_INTERVAL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            lease_expiry: DEFAULT_LEASE_EXPIRY,
            lease_renewal_interval: DEFAULT_LEASE_RENEWAL_INTERVAL,
            progress_notify_interval: DEFAULT_PROGRESS_NOTIFY_INTERVAL,
        }
    }
}

impl DriverSettings {
    pub fn validate(&self) -> Result<()> {
        if self.job_timeout.is_zero() {
            return Err(AppError::Config("job timeout must be positive".into()));
        }
        if self.job_poll_interval.is_zero() {
            return Err(AppError::Config("job poll interval must be positive".into()));
        }
        if self.cleanup_interval <= self.job_timeout {
            return Err(AppError::Config(format!(
                "cleanup interval ({:?}) must be greater than the job timeout ({:?})",
                self.cleanup_interval, self.job_timeout
            )));
        }
        if self.lease_renewal_interval.is_zero() || self.lease_renewal_interval >= self.lease_expiry
        {
            return Err(AppError::Config(format!(
                "lease renewal interval ({:?}) must be positive and below the lease expiry ({:?})",
                self.lease_renewal_interval, self.lease_expiry
            )));
        }
        Ok(())
    }
}
