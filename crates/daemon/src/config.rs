//! Daemon configuration from `PROVISIONING_*` environment variables

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use provisioning_core::application::DriverSettings;
use provisioning_core::domain::JobAction;

pub const DEFAULT_DB_PATH: &str = "~/.provisioning/jobs.db";
pub const DEFAULT_DRIVERS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub drivers: usize,
    pub settings: DriverSettings,
    /// Shell command run for every job; no hook means jobs fail with no worker
    pub hook: Option<String>,
    /// Actions the hook accepts (empty = all)
    pub hook_actions: Vec<JobAction>,
    /// Archive from the drivers and a standalone expiry controller
    /// instead of from the store
    pub split_history: bool,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests need not touch the process env
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup("PROVISIONING_JOBS_DB_PATH")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = PathBuf::from(shellexpand::tilde(&db_path).into_owned());

        let drivers = parse(&lookup, "PROVISIONING_JOBS_DRIVERS")?.unwrap_or(DEFAULT_DRIVERS);
        if drivers == 0 {
            bail!("PROVISIONING_JOBS_DRIVERS must be at least 1");
        }

        let mut settings = DriverSettings::default();
        let secs = |key: &str| -> Result<Option<Duration>> {
            Ok(parse::<u64>(&lookup, key)?.map(Duration::from_secs))
        };
        if let Some(d) = secs("PROVISIONING_JOBS_JOB_TIMEOUT_SECS")? {
            settings.job_timeout = d;
        }
        if let Some(d) = secs("PROVISIONING_JOBS_POLL_INTERVAL_SECS")? {
            settings.job_poll_interval = d;
        }
        if let Some(d) = secs("PROVISIONING_JOBS_CLEANUP_INTERVAL_SECS")? {
            settings.cleanup_interval = d;
        }
        if let Some(d) = secs("PROVISIONING_JOBS_LEASE_EXPIRY_SECS")? {
            settings.lease_expiry = d;
        }
        if let Some(d) = secs("PROVISIONING_JOBS_LEASE_RENEWAL_SECS")? {
            settings.lease_renewal_interval = d;
        }
        settings
            .validate()
            .context("invalid job driver settings")?;

        let hook = lookup("PROVISIONING_JOBS_HOOK").filter(|h| !h.trim().is_empty());
        let hook_actions = match lookup("PROVISIONING_JOBS_HOOK_ACTIONS") {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| JobAction::from_str(s).context("PROVISIONING_JOBS_HOOK_ACTIONS"))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let split_history = match lookup("PROVISIONING_JOBS_SPLIT_HISTORY") {
            Some(v) => parse_bool(&v)
                .with_context(|| format!("PROVISIONING_JOBS_SPLIT_HISTORY={v}"))?,
            None => false,
        };

        let log_format = match lookup("PROVISIONING_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            db_path,
            drivers,
            settings,
            hook,
            hook_actions,
            split_history,
            log_format,
        })
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key}={raw}")),
        None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("not a boolean: {other}"),
    }
}
