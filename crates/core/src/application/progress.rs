// Progress Recorder: turns many resource-level outcomes into one job status

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::application::driver::constants::{
    DEFAULT_MAX_ERRORS, DEFAULT_MAX_ERROR_PERCENT, DEFAULT_MIN_PROCESSED_FOR_RATIO,
    DEFAULT_PROGRESS_NOTIFY_INTERVAL, MAX_RETAINED_MESSAGES,
};
use crate::domain::{
    JobResourceResult, JobResourceSummary, JobState, JobStatus, ResourceAction,
};
use crate::error::{AppError, Result};
use crate::port::{ProgressRecorder, TimeProvider};

pub const MESSAGE_COMPLETED: &str = "completed successfully";
pub const MESSAGE_COMPLETED_WITH_WARNINGS: &str = "completed with warnings";
pub const MESSAGE_COMPLETED_WITH_ERRORS: &str = "completed with errors";

/// Receives intermediate status snapshots (typically persists them)
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    async fn notify(&self, status: JobStatus) -> Result<()>;
}

/// Point past which a bulk operation should abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBudget {
    /// Trip at `max_errors`, or once `min_processed` resources were processed
    /// and at least `max_percent` of them failed
    Relative {
        max_errors: usize,
        max_percent: usize,
        min_processed: usize,
    },
    /// Trip at exactly this many errors
    Strict(usize),
}

impl Default for ErrorBudget {
    fn default() -> Self {
        ErrorBudget::Relative {
            max_errors: DEFAULT_MAX_ERRORS,
            max_percent: DEFAULT_MAX_ERROR_PERCENT,
            min_processed: DEFAULT_MIN_PROCESSED_FOR_RATIO,
        }
    }
}

impl ErrorBudget {
    pub fn is_exhausted(&self, errors: usize, processed: usize) -> bool {
        if errors == 0 {
            return false;
        }
        match *self {
            ErrorBudget::Strict(max) => errors >= max,
            ErrorBudget::Relative {
                max_errors,
                max_percent,
                min_processed,
            } => {
                errors >= max_errors
                    || (processed >= min_processed && errors * 100 >= processed * max_percent)
            }
        }
    }
}

fn push_bounded(list: &mut Vec<String>, message: String) {
    if list.len() < MAX_RETAINED_MESSAGES {
        list.push(message);
    }
}

/// Accumulates results for one running job
pub struct JobProgressRecorder {
    notifier: Arc<dyn ProgressNotifier>,
    time_provider: Arc<dyn TimeProvider>,
    notify_interval_ms: i64,
    last_notify: Option<i64>,

    started: i64,
    message: String,
    final_message: Option<String>,
    reference: Option<String>,
    total: usize,
    processed: usize,
    error_count: usize,
    warning_count: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
    summaries: BTreeMap<(String, String), JobResourceSummary>,
    budget: ErrorBudget,
    failed_creations: Vec<String>,
    failed_deletions: Vec<String>,
}

impl JobProgressRecorder {
    pub fn new(notifier: Arc<dyn ProgressNotifier>, time_provider: Arc<dyn TimeProvider>) -> Self {
        let started = time_provider.now_millis();
        Self {
            notifier,
            time_provider,
            notify_interval_ms: DEFAULT_PROGRESS_NOTIFY_INTERVAL.as_millis() as i64,
            last_notify: None,
            started,
            message: String::new(),
            final_message: None,
            reference: None,
            total: 0,
            processed: 0,
            error_count: 0,
            warning_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            summaries: BTreeMap::new(),
            budget: ErrorBudget::default(),
            failed_creations: Vec::new(),
            failed_deletions: Vec::new(),
        }
    }

    /// Minimum delay between intermediate notifications (zero = every change)
    pub fn with_notify_interval(mut self, interval: Duration) -> Self {
        self.notify_interval_ms = interval.as_millis() as i64;
        self
    }

    pub fn with_error_budget(mut self, budget: ErrorBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// Summaries rebuilt from the running counters, ordered by (group, kind)
    pub fn summaries(&self) -> Vec<JobResourceSummary> {
        self.summaries.values().cloned().collect()
    }

    fn progress_percent(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let pct = (self.processed as f64 / self.total as f64) * 100.0;
        Some(pct.min(100.0))
    }

    fn in_flight_status(&self) -> JobStatus {
        JobStatus {
            state: JobState::Working,
            message: self.message.clone(),
            progress: self.progress_percent(),
            summary: self.summaries(),
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            reference: self.reference.clone(),
            started: Some(self.started),
            finished: None,
        }
    }

    async fn maybe_notify(&mut self) {
        let now = self.time_provider.now_millis();
        if let Some(last) = self.last_notify {
            if now - last < self.notify_interval_ms {
                return;
            }
        }
        self.last_notify = Some(now);
        let status = self.in_flight_status();
        if let Err(e) = self.notifier.notify(status).await {
            warn!(error = %e, "Failed to persist job progress");
        }
    }

    /// Finalize the status.
    ///
    /// Precedence: explicit `err`, then accumulated errors, then warnings, then
    /// success. A final message replaces the canned phrase, never `err`.
    pub fn complete(&mut self, err: Option<&AppError>) -> JobStatus {
        let mut errors = self.errors.clone();
        let (state, canned) = if let Some(err) = err {
            let text = err.to_string();
            errors.push(text.clone());
            (JobState::Error, text)
        } else if self.error_count > 0 {
            (JobState::Error, MESSAGE_COMPLETED_WITH_ERRORS.to_string())
        } else if self.warning_count > 0 {
            (JobState::Warning, MESSAGE_COMPLETED_WITH_WARNINGS.to_string())
        } else {
            (JobState::Success, MESSAGE_COMPLETED.to_string())
        };

        let message = match (&self.final_message, err) {
            (Some(final_message), None) => final_message.clone(),
            _ => canned,
        };

        debug!(state = %state, processed = self.processed, errors = self.error_count, "Job progress finalized");

        JobStatus {
            state,
            message,
            progress: None,
            summary: self.summaries(),
            errors,
            warnings: self.warnings.clone(),
            reference: self.reference.clone(),
            started: Some(self.started),
            finished: Some(self.time_provider.now_millis()),
        }
    }
}

#[async_trait]
impl ProgressRecorder for JobProgressRecorder {
    async fn record(&mut self, result: JobResourceResult) {
        self.processed += 1;

        let summary = self
            .summaries
            .entry((result.group.clone(), result.kind.clone()))
            .or_insert_with(|| JobResourceSummary::new(&result.group, &result.kind));

        if let Some(err) = &result.error {
            let text = format!("{}: {}", result.describe(), err);
            summary.error += 1;
            push_bounded(&mut summary.errors, text.clone());
            self.error_count += 1;
            push_bounded(&mut self.errors, text);

            match result.action {
                ResourceAction::Created if result.path.ends_with('/') => {
                    self.failed_creations.push(result.path.clone())
                }
                ResourceAction::Deleted => self.failed_deletions.push(result.path.clone()),
                _ => {}
            }
        } else {
            if let Some(warning) = &result.warning {
                let text = format!("{}: {}", result.describe(), warning);
                summary.warning += 1;
                push_bounded(&mut summary.warnings, text.clone());
                self.warning_count += 1;
                push_bounded(&mut self.warnings, text);
            }
            match result.action {
                ResourceAction::Created => {
                    summary.create += 1;
                    summary.write += 1;
                }
                ResourceAction::Updated | ResourceAction::Renamed => {
                    summary.update += 1;
                    summary.write += 1;
                }
                ResourceAction::Deleted => {
                    summary.delete += 1;
                    summary.write += 1;
                }
                ResourceAction::Ignored => summary.noop += 1,
            }
        }

        self.maybe_notify().await;
    }

    async fn set_message(&mut self, message: &str) {
        self.message = message.to_string();
        self.maybe_notify().await;
    }

    async fn set_total(&mut self, total: usize) {
        self.total = total;
        self.maybe_notify().await;
    }

    async fn set_ref(&mut self, reference: &str) {
        self.reference = Some(reference.to_string());
        self.maybe_notify().await;
    }

    fn set_final_message(&mut self, message: &str) {
        self.final_message = Some(message.to_string());
    }

    fn strict_max_errors(&mut self, max: usize) {
        self.budget = ErrorBudget::Strict(max);
    }

    fn too_many_errors(&self) -> Result<()> {
        if self.budget.is_exhausted(self.error_count, self.processed) {
            return Err(AppError::TooManyErrors {
                errors: self.error_count,
                processed: self.processed,
            });
        }
        Ok(())
    }

    fn reset_results(&mut self) {
        self.processed = 0;
        self.total = 0;
        self.error_count = 0;
        self.warning_count = 0;
        self.errors.clear();
        self.warnings.clear();
        self.summaries.clear();
        self.failed_creations.clear();
        self.failed_deletions.clear();
    }

    fn is_nested_under_failed_creation(&self, path: &str) -> bool {
        self.failed_creations
            .iter()
            .any(|folder| path != folder && path.starts_with(folder.as_str()))
    }

    fn has_failed_deletions_under(&self, path: &str) -> bool {
        self.failed_deletions
            .iter()
            .any(|deleted| deleted != path && deleted.starts_with(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::MockTimeProvider;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingNotifier {
        statuses: Mutex<Vec<JobStatus>>,
    }

    #[async_trait]
    impl ProgressNotifier for CapturingNotifier {
        async fn notify(&self, status: JobStatus) -> Result<()> {
            self.statuses.lock().unwrap().push(status);
            Ok(())
        }
    }

    fn recorder() -> (JobProgressRecorder, Arc<CapturingNotifier>, Arc<MockTimeProvider>) {
        let notifier = Arc::new(CapturingNotifier::default());
        let clock = Arc::new(MockTimeProvider::new(1_000));
        let recorder = JobProgressRecorder::new(notifier.clone(), clock.clone());
        (recorder, notifier, clock)
    }

    fn result(action: ResourceAction) -> JobResourceResult {
        JobResourceResult::new("res", "G", "K", "res.json", action)
    }

    #[tokio::test]
    async fn test_aggregates_by_group_and_kind() {
        let (mut recorder, _, _) = recorder();
        recorder.record(result(ResourceAction::Created)).await;
        recorder.record(result(ResourceAction::Created)).await;
        recorder.record(result(ResourceAction::Updated)).await;
        recorder
            .record(result(ResourceAction::Updated).with_error("boom"))
            .await;

        let summaries = recorder.summaries();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!((summary.group.as_str(), summary.kind.as_str()), ("G", "K"));
        assert_eq!(summary.create, 2);
        assert_eq!(summary.update, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.write, 3);
        assert_eq!(summary.errors, vec!["res.json: boom".to_string()]);
    }

    #[tokio::test]
    async fn test_complete_with_warnings_only() {
        let (mut recorder, _, _) = recorder();
        recorder.record(result(ResourceAction::Created)).await;
        recorder
            .record(result(ResourceAction::Updated).with_warning("deprecated"))
            .await;

        let status = recorder.complete(None);
        assert_eq!(status.state, JobState::Warning);
        assert_eq!(status.message, MESSAGE_COMPLETED_WITH_WARNINGS);
        assert!(status.progress.is_none());
        assert!(status.finished.is_some());
    }

    #[tokio::test]
    async fn test_errors_take_priority_over_warnings() {
        let (mut recorder, _, _) = recorder();
        recorder
            .record(result(ResourceAction::Updated).with_warning("deprecated"))
            .await;
        recorder
            .record(result(ResourceAction::Created).with_error("denied"))
            .await;

        let status = recorder.complete(None);
        assert_eq!(status.state, JobState::Error);
        assert_eq!(status.message, MESSAGE_COMPLETED_WITH_ERRORS);
        assert_eq!(status.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_error_wins_over_final_message() {
        let (mut recorder, _, _) = recorder();
        recorder.set_final_message("no changes to sync");
        let err = AppError::Worker("clone failed".into());

        let status = recorder.complete(Some(&err));
        assert_eq!(status.state, JobState::Error);
        assert_eq!(status.message, "Worker error: clone failed");
        assert_eq!(status.errors, vec!["Worker error: clone failed".to_string()]);
    }

    #[tokio::test]
    async fn test_final_message_replaces_canned_phrase() {
        let (mut recorder, _, _) = recorder();
        recorder.set_final_message("no changes to sync");

        let status = recorder.complete(None);
        assert_eq!(status.state, JobState::Success);
        assert_eq!(status.message, "no changes to sync");
    }

    #[tokio::test]
    async fn test_strict_budget_trips_at_cap() {
        let (mut recorder, _, _) = recorder();
        recorder.strict_max_errors(1);
        assert!(recorder.too_many_errors().is_ok());

        recorder
            .record(result(ResourceAction::Deleted).with_error("denied"))
            .await;
        let err = recorder.too_many_errors().unwrap_err();
        assert!(matches!(err, AppError::TooManyErrors { errors: 1, processed: 1 }));
    }

    #[tokio::test]
    async fn test_relative_budget_needs_a_sample() {
        let (mut recorder, _, _) = recorder();
        for _ in 0..4 {
            recorder
                .record(result(ResourceAction::Created).with_error("bad"))
                .await;
        }
        // 100% failures but below the minimum sample size
        assert!(recorder.too_many_errors().is_ok());

        for _ in 0..6 {
            recorder.record(result(ResourceAction::Created)).await;
        }
        assert!(recorder.too_many_errors().is_ok(), "40% is within budget");

        recorder
            .record(result(ResourceAction::Created).with_error("bad"))
            .await;
        recorder
            .record(result(ResourceAction::Created).with_error("bad"))
            .await;
        // 6 of 12 = 50%
        assert!(recorder.too_many_errors().is_err());
    }

    #[tokio::test]
    async fn test_reset_results_clears_counts() {
        let (mut recorder, _, _) = recorder();
        recorder
            .record(result(ResourceAction::Created).with_error("bad"))
            .await;
        recorder.reset_results();

        assert_eq!(recorder.processed(), 0);
        assert!(recorder.summaries().is_empty());
        assert_eq!(recorder.complete(None).state, JobState::Success);
    }

    #[tokio::test]
    async fn test_hierarchical_failure_tracking() {
        let (mut recorder, _, _) = recorder();
        recorder
            .record(
                JobResourceResult::new("", "folder", "Folder", "folder1/", ResourceAction::Created)
                    .with_error("permission denied"),
            )
            .await;
        recorder
            .record(
                JobResourceResult::new(
                    "file1",
                    "dashboards",
                    "Dashboard",
                    "folder2/file1.json",
                    ResourceAction::Deleted,
                )
                .with_error("permission denied"),
            )
            .await;

        assert!(recorder.is_nested_under_failed_creation("folder1/sub/"));
        assert!(recorder.is_nested_under_failed_creation("folder1/file.json"));
        assert!(!recorder.is_nested_under_failed_creation("folder1/"));
        assert!(!recorder.is_nested_under_failed_creation("other/file.json"));

        assert!(recorder.has_failed_deletions_under("folder2/"));
        assert!(!recorder.has_failed_deletions_under("folder1/"));
    }

    #[tokio::test]
    async fn test_notifications_are_throttled() {
        let (recorder, notifier, clock) = recorder();
        let mut recorder = recorder.with_notify_interval(Duration::from_secs(5));

        recorder.set_total(4).await;
        recorder.record(result(ResourceAction::Created)).await;
        recorder.record(result(ResourceAction::Created)).await;
        assert_eq!(notifier.statuses.lock().unwrap().len(), 1);

        clock.advance_millis(5_000);
        recorder.set_message("halfway").await;

        let statuses = notifier.statuses.lock().unwrap();
        assert_eq!(statuses.len(), 2);
        let last = statuses.last().unwrap();
        assert_eq!(last.state, JobState::Working);
        assert_eq!(last.message, "halfway");
        assert_eq!(last.progress, Some(50.0));
    }

    #[tokio::test]
    async fn test_retained_messages_are_bounded() {
        let (mut recorder, _, _) = recorder();
        for i in 0..(MAX_RETAINED_MESSAGES + 5) {
            recorder
                .record(
                    JobResourceResult::new(format!("r{i}"), "G", "K", "", ResourceAction::Updated)
                        .with_warning("w"),
                )
                .await;
        }
        let status = recorder.complete(None);
        assert_eq!(status.warnings.len(), MAX_RETAINED_MESSAGES);
        assert_eq!(status.summary[0].warning as usize, MAX_RETAINED_MESSAGES + 5);
    }
}
