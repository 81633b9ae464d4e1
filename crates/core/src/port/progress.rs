// Progress Recorder Port (Interface)
//
// What a worker sees while it executes a job. The driver owns the concrete
// recorder and finalizes it; workers only feed outcomes in.

use async_trait::async_trait;

use crate::domain::JobResourceResult;
use crate::error::Result;

#[async_trait]
pub trait ProgressRecorder: Send {
    /// Append one resource outcome
    async fn record(&mut self, result: JobResourceResult);

    /// In-flight status message surfaced to pollers
    async fn set_message(&mut self, message: &str);

    /// Expected number of resources, used for the progress percentage
    async fn set_total(&mut self, total: usize);

    /// Ref (commit, branch) the job is working against
    async fn set_ref(&mut self, reference: &str);

    /// Message to use instead of the canned completion phrase
    fn set_final_message(&mut self, message: &str);

    /// Replace the default error budget with a hard cap
    fn strict_max_errors(&mut self, max: usize);

    /// `Err(TooManyErrors)` once the error budget is exhausted
    fn too_many_errors(&self) -> Result<()>;

    /// Forget accumulated results (between phases of one job)
    fn reset_results(&mut self);

    /// True if `path` lives below a folder whose creation failed
    fn is_nested_under_failed_creation(&self, path: &str) -> bool;

    /// True if some deletion below folder `path` failed
    fn has_failed_deletions_under(&self, path: &str) -> bool;
}
