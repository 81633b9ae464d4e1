// Driver constants (no magic values)
use std::time::Duration;

/// Maximum unclaimed jobs inspected per claim attempt
pub const CLAIM_PAGE_SIZE: usize = 16;

/// Expired leases reclaimed per listing
pub const CLEANUP_BATCH_SIZE: usize = 100;

/// Retry hint carried by the "no jobs" condition
pub const NO_JOBS_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Budget for releasing a claim once the caller has given up (detached)
pub const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for archiving + completing a job after its worker returned
pub const FINALIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a single job may run (claim -> process -> complete)
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default cadence of the driver's own poll for new work
pub const DEFAULT_JOB_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default cadence of the store's expired-lease cleanup (must exceed job timeout)
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default claim age after which a job is considered abandoned
pub const DEFAULT_LEASE_EXPIRY: Duration = Duration::from_secs(30);

/// Default interval between lease renewals while a worker runs
pub const DEFAULT_LEASE_RENEWAL_INTERVAL: Duration = Duration::from_secs(10);

/// Default minimum delay between intermediate progress writes
pub const DEFAULT_PROGRESS_NOTIFY_INTERVAL: Duration = Duration::from_secs(5);

/// Bounds for the expiry controller cadence (3x lease expiry, clamped)
pub const MIN_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub const MAX_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Error/warning strings retained per job status and per summary
pub const MAX_RETAINED_MESSAGES: usize = 20;

/// Default error budget: absolute cap
pub const DEFAULT_MAX_ERRORS: usize = 20;

/// Default error budget: relative threshold (percent of processed) ...
pub const DEFAULT_MAX_ERROR_PERCENT: usize = 50;

/// ... evaluated once at least this many resources were processed
pub const DEFAULT_MIN_PROCESSED_FOR_RATIO: usize = 10;
