//! Provisioning Jobs - Main Entry Point
//! Composition root: SQLite store, hook worker, concurrent job drivers

mod config;
mod logging;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use provisioning_core::application::{
    shutdown_channel, ConcurrentJobDriver, ExpiredJobCleanupController, JobStore,
};
use provisioning_core::domain::{
    JobAction, JobSpec, MigrateJobOptions, PullJobOptions, PullRequestJobOptions, PushJobOptions,
    SyncJobOptions,
};
use provisioning_core::error::AppError;
use provisioning_core::port::id_provider::UuidProvider;
use provisioning_core::port::time_provider::SystemTimeProvider;
use provisioning_core::port::{HistoryWriter, Worker};
use provisioning_infra_sqlite::{
    create_pool, run_migrations, SqliteHistoryWriter, SqlitePool, SqliteRecordStore,
};
use provisioning_infra_system::CommandWorker;

use config::Config;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const HOOK_WORKER_NAME: &str = "hook";

#[derive(Parser)]
#[command(name = "provisioning-jobs")]
#[command(about = "Crash-tolerant provisioning job queue", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job drivers until Ctrl+C (default)
    Run,

    /// Insert a job and exit
    Enqueue(EnqueueArgs),

    /// List finished jobs of a repository, newest first
    History {
        #[arg(short, long)]
        namespace: String,

        #[arg(short, long)]
        repository: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Args)]
struct EnqueueArgs {
    #[arg(short, long)]
    namespace: String,

    #[arg(short, long)]
    repository: String,

    /// sync, migrate, push, pull or pr
    #[arg(short, long)]
    action: String,

    /// Pull request number (pr)
    #[arg(long)]
    number: Option<u64>,

    /// Git ref (pull, pr)
    #[arg(long = "ref")]
    reference: Option<String>,

    /// Branch to push to (push)
    #[arg(long)]
    branch: Option<String>,

    /// Repository subdirectory (push, pull)
    #[arg(long)]
    path: Option<String>,

    /// Commit message (push, migrate)
    #[arg(long)]
    message: Option<String>,

    /// Only apply changes since the last synced ref (sync)
    #[arg(long)]
    incremental: bool,

    /// Replay commit history (migrate)
    #[arg(long)]
    history: bool,
}

impl EnqueueArgs {
    fn spec(&self) -> Result<JobSpec> {
        let repo = self.repository.clone();
        let spec = match JobAction::from_str(&self.action)? {
            JobAction::Sync => JobSpec::sync(
                repo,
                SyncJobOptions {
                    incremental: self.incremental,
                },
            ),
            JobAction::Migrate => JobSpec::migrate(
                repo,
                MigrateJobOptions {
                    history: self.history,
                    message: self.message.clone(),
                },
            ),
            JobAction::Push => JobSpec::push(
                repo,
                PushJobOptions {
                    branch: self.branch.clone(),
                    path: self.path.clone(),
                    message: self.message.clone(),
                },
            ),
            JobAction::Pull => JobSpec::pull(
                repo,
                PullJobOptions {
                    reference: self.reference.clone(),
                    path: self.path.clone(),
                },
            ),
            JobAction::PullRequest => JobSpec::pull_request(
                repo,
                PullRequestJobOptions {
                    number: self
                        .number
                        .context("--number is required for pull request jobs")?,
                    reference: self.reference.clone(),
                    ..Default::default()
                },
            ),
        };
        Ok(spec)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    logging::init(config.log_format)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Enqueue(args) => enqueue(config, args).await,
        Commands::History {
            namespace,
            repository,
            limit,
        } => history(config, &namespace, &repository, limit).await,
    }
}

async fn open_database(config: &Config) -> Result<SqlitePool> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    info!(db_path = %config.db_path.display(), "Initializing database...");
    let pool = create_pool(&config.database_url())
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;
    Ok(pool)
}

fn job_store(pool: &SqlitePool, config: &Config) -> JobStore {
    JobStore::new(
        Arc::new(SqliteRecordStore::new(pool.clone())),
        Arc::new(SystemTimeProvider),
        Arc::new(UuidProvider),
    )
    .with_lease_expiry(config.settings.lease_expiry)
}

fn workers(config: &Config) -> Vec<Arc<dyn Worker>> {
    match &config.hook {
        Some(hook) => {
            info!(hook = %hook, actions = ?config.hook_actions, "Registering job hook");
            vec![Arc::new(
                CommandWorker::new(HOOK_WORKER_NAME, hook.clone())
                    .with_actions(config.hook_actions.clone()),
            ) as Arc<dyn Worker>]
        }
        None => {
            warn!("PROVISIONING_JOBS_HOOK not set; every job will fail with no worker");
            Vec::new()
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Provisioning Jobs v{} starting...", VERSION);

    let pool = open_database(&config).await?;
    let history: Arc<dyn HistoryWriter> = Arc::new(SqliteHistoryWriter::new(pool.clone()));

    // Either the store archives on completion, or the drivers and the
    // standalone expiry controller do
    let mut store = job_store(&pool, &config);
    let driver_history = if config.split_history {
        Some(history.clone())
    } else {
        store = store.with_history(history.clone());
        None
    };

    let group = ConcurrentJobDriver::new(
        config.drivers,
        config.settings.clone(),
        store.clone(),
        workers(&config),
        driver_history,
    )?;

    let (shutdown_tx, group_token) = shutdown_channel();
    let mut group_handle = tokio::spawn(async move { group.run(group_token).await });

    let controller_handle = if config.split_history {
        let controller = ExpiredJobCleanupController::new(store.clone(), Some(history.clone()));
        let token = shutdown_tx.token();
        Some(tokio::spawn(async move { controller.run(token).await }))
    } else {
        None
    };

    info!(drivers = config.drivers, "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully...");
            signal.context("listening for Ctrl+C")
        }
        joined = &mut group_handle => match joined {
            Ok(Ok(())) | Ok(Err(AppError::Cancelled)) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Job drivers stopped");
                Err(anyhow!(e).context("job drivers failed"))
            }
            Err(e) => Err(anyhow!("job driver group panicked: {e}")),
        },
    };

    shutdown_tx.shutdown();
    if !group_handle.is_finished() {
        if tokio::time::timeout(SHUTDOWN_GRACE, group_handle).await.is_err() {
            warn!(grace = ?SHUTDOWN_GRACE, "Job drivers did not stop in time");
        }
    }
    if let Some(handle) = controller_handle {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
    }
    pool.close().await;

    info!("Shutdown complete.");
    outcome
}

async fn enqueue(config: Config, args: EnqueueArgs) -> Result<()> {
    let spec = args.spec()?;
    let pool = open_database(&config).await?;
    let store = job_store(&pool, &config);

    let job = store
        .insert(&args.namespace, spec)
        .await
        .with_context(|| format!("enqueueing {} job", args.action))?;
    info!(job = %job.key(), uid = %job.uid, "Job enqueued");

    println!("{}", serde_json::to_string_pretty(&job)?);
    pool.close().await;
    Ok(())
}

async fn history(config: Config, namespace: &str, repository: &str, limit: usize) -> Result<()> {
    let pool = open_database(&config).await?;
    let writer = SqliteHistoryWriter::new(pool.clone());

    let jobs = writer.list_history(namespace, repository, limit).await?;
    for job in &jobs {
        println!("{}", serde_json::to_string(job)?);
    }
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(action: &str) -> EnqueueArgs {
        EnqueueArgs {
            namespace: "ns".into(),
            repository: "repo".into(),
            action: action.into(),
            number: None,
            reference: None,
            branch: None,
            path: None,
            message: None,
            incremental: false,
            history: false,
        }
    }

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::try_parse_from(["provisioning-jobs"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_enqueue_builds_spec_for_action() {
        let mut sync = args("sync");
        sync.incremental = true;
        let spec = sync.spec().unwrap();
        assert_eq!(spec.action().unwrap(), JobAction::Sync);
        assert_eq!(spec.sync, Some(SyncJobOptions { incremental: true }));

        let mut pr = args("pr");
        pr.number = Some(42);
        let spec = pr.spec().unwrap();
        assert_eq!(spec.pull_request.map(|o| o.number), Some(42));
    }

    #[test]
    fn test_pull_request_requires_number() {
        assert!(args("pr").spec().is_err());
        assert!(args("export").spec().is_err());
    }

    #[test]
    fn test_parses_enqueue_flags() {
        let cli = Cli::try_parse_from([
            "provisioning-jobs",
            "enqueue",
            "-n",
            "tenant-a",
            "-r",
            "repo",
            "-a",
            "pull",
            "--ref",
            "main",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Enqueue(args)) => {
                let spec = args.spec().unwrap();
                assert_eq!(spec.pull.and_then(|p| p.reference).as_deref(), Some("main"));
            }
            _ => panic!("expected enqueue"),
        }
    }
}
