// Command hook worker
// Runs `sh -c <hook>` per job and streams its stdout into the progress recorder
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use provisioning_core::domain::{Job, JobAction, JobResourceResult};
use provisioning_core::error::{AppError, Result};
use provisioning_core::port::{JobContext, ProgressRecorder, RepositoryRef, Worker};

/// Bytes of stderr kept for the failure message
const STDERR_TAIL_BYTES: usize = 2048;

/// One line of hook output
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HookLine {
    Result(JobResourceResult),
    Control(HookControl),
}

/// Status updates a hook may emit between results
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HookControl {
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "ref")]
    reference: Option<String>,
    #[serde(default)]
    final_message: Option<String>,
    #[serde(default)]
    max_errors: Option<usize>,
}

/// Worker delegating to an external program.
///
/// The hook sees the job through `JOB_*` environment variables and reports
/// back one JSON object per stdout line: either a resource result
/// (`{"name":..,"group":..,"kind":..,"path":..,"action":"created"}`) or a
/// control update (`{"total":10}`, `{"message":".."}`, `{"ref":".."}`,
/// `{"final_message":".."}`, `{"max_errors":5}`). Other lines are logged.
pub struct CommandWorker {
    name: String,
    hook: String,
    actions: Vec<JobAction>,
    env_allowlist: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandWorker {
    /// Worker handling every action with `hook`
    ///
    /// # Example
    /// ```ignore
    /// let worker = CommandWorker::new("git-sync", "/usr/local/bin/provision")
    ///     .with_actions(vec![JobAction::Sync, JobAction::Pull])
    ///     .with_env_allowlist(vec!["PATH".to_string(), "HOME".to_string()]);
    /// ```
    pub fn new(name: impl Into<String>, hook: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hook: hook.into(),
            actions: Vec::new(),
            env_allowlist: vec!["PATH".to_string(), "HOME".to_string()],
            working_dir: None,
        }
    }

    /// Restrict to these actions (empty = all)
    pub fn with_actions(mut self, actions: Vec<JobAction>) -> Self {
        self.actions = actions;
        self
    }

    /// Inherited environment variables; everything else is cleared
    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = allowlist;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self, ctx: &JobContext, repo: &RepositoryRef, job: &Job) -> Result<Command> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.hook)
            .env_clear()
            .envs(
                std::env::vars().filter(|(key, _)| self.env_allowlist.iter().any(|a| a == key)),
            )
            .env("JOB_NAME", &job.name)
            .env("JOB_UID", &job.uid)
            .env("JOB_NAMESPACE", ctx.namespace())
            .env("JOB_IDENTITY", &ctx.identity.subject)
            .env("JOB_REPOSITORY", &repo.name)
            .env("JOB_ACTION", ctx.action.as_str())
            .env("JOB_SPEC", serde_json::to_string(&job.spec)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        Ok(command)
    }

    async fn apply_line(&self, line: &str, progress: &mut dyn ProgressRecorder) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        match serde_json::from_str::<HookLine>(line) {
            Ok(HookLine::Result(result)) => {
                progress.record(result).await;
                progress.too_many_errors()?;
            }
            Ok(HookLine::Control(control)) => {
                if let Some(max) = control.max_errors {
                    progress.strict_max_errors(max);
                }
                if let Some(total) = control.total {
                    progress.set_total(total).await;
                }
                if let Some(reference) = &control.reference {
                    progress.set_ref(reference).await;
                }
                if let Some(message) = &control.message {
                    progress.set_message(message).await;
                }
                if let Some(message) = &control.final_message {
                    progress.set_final_message(message);
                }
            }
            Err(_) => debug!(hook_output = %line, "Hook output"),
        }
        Ok(())
    }
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

#[async_trait]
impl Worker for CommandWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_supported(&self, job: &Job) -> bool {
        match job.spec.action() {
            Ok(action) => self.actions.is_empty() || self.actions.contains(&action),
            Err(_) => false,
        }
    }

    async fn process(
        &self,
        ctx: &JobContext,
        repo: &RepositoryRef,
        job: &Job,
        progress: &mut dyn ProgressRecorder,
    ) -> Result<()> {
        info!(worker = %self.name, hook = %self.hook, "Starting job hook");

        let mut child = self.command(ctx, repo, job)?.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Internal("hook stdout not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Internal("hook stderr not captured".into()))?;

        // Drained concurrently so a chatty hook cannot block on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Err(e) = self.apply_line(&line, progress).await {
                warn!(error = %e, "Aborting job hook");
                let _ = child.kill().await;
                return Err(e);
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let detail = tail(&stderr);
            return Err(AppError::Worker(if detail.is_empty() {
                format!("hook {}", status)
            } else {
                format!("hook {}: {}", status, detail)
            }));
        }

        info!(worker = %self.name, "Job hook finished");
        Ok(())
    }
}
