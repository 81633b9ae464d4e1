// Application Layer - Use Cases and Business Logic

pub mod driver;
pub mod expiry;
pub mod job_store;
pub mod progress;
pub mod wake;

// Re-exports
pub use driver::{
    shutdown_channel, ConcurrentJobDriver, DriverLoop, DriverSettings, JobDriver, ShutdownSender,
    ShutdownToken,
};
pub use expiry::ExpiredJobCleanupController;
pub use job_store::{ClaimGuard, JobStore, SweepStats};
pub use progress::{ErrorBudget, JobProgressRecorder, ProgressNotifier};
pub use wake::WakeSignal;
