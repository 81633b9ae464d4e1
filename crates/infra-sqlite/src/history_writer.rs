// SQLite HistoryWriter Implementation

use async_trait::async_trait;
use provisioning_core::domain::{HistoricJob, Job};
use provisioning_core::error::{AppError, Result};
use provisioning_core::port::{HistoryWriter, StoreResult};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{corrupt_record, map_sqlx_error};

pub struct SqliteHistoryWriter {
    pool: SqlitePool,
}

impl SqliteHistoryWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Finished jobs of one repository, newest first
    pub async fn list_history(
        &self,
        namespace: &str,
        repository: &str,
        limit: usize,
    ) -> StoreResult<Vec<HistoricJob>> {
        let bodies: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT body FROM historic_jobs
            WHERE namespace = ? AND repository = ?
            ORDER BY created_at DESC, name DESC
            LIMIT ?
            "#,
        )
        .bind(namespace)
        .bind(repository)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(corrupt_record))
            .collect()
    }

    /// Archived copy of the live job that had `uid`
    pub async fn find_by_original_uid(
        &self,
        namespace: &str,
        uid: &str,
    ) -> StoreResult<Option<HistoricJob>> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body FROM historic_jobs WHERE namespace = ? AND original_uid = ?",
        )
        .bind(namespace)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        body.map(|body| serde_json::from_str(&body).map_err(corrupt_record))
            .transpose()
    }
}

#[async_trait]
impl HistoryWriter for SqliteHistoryWriter {
    /// Upsert by historic name, so archiving one job twice keeps one row
    async fn write_job(&self, job: &Job) -> Result<()> {
        let historic = HistoricJob::from_job(job);
        let body = serde_json::to_string(&historic)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO historic_jobs
                (namespace, name, original_uid, repository, state, created_at, finished_at, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&historic.namespace)
        .bind(&historic.name)
        .bind(&job.uid)
        .bind(historic.repository())
        .bind(historic.status.state.to_string())
        .bind(historic.created_at)
        .bind(historic.status.finished)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Store(map_sqlx_error(e)))?;

        debug!(job = %job.key(), historic = %historic.name, "Job archived");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use provisioning_core::domain::{labels, JobSpec, JobState, PullRequestJobOptions, SyncJobOptions};

    async fn setup_writer() -> SqliteHistoryWriter {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteHistoryWriter::new(pool)
    }

    fn finished(name: &str, uid: &str, created_at: i64, spec: JobSpec) -> Job {
        let mut job = Job::new("ns", name, uid, created_at, spec);
        job.set_claim(created_at);
        job.status.state = JobState::Success;
        job.status.finished = Some(created_at + 10);
        job
    }

    #[tokio::test]
    async fn test_write_is_idempotent_per_uid() {
        let writer = setup_writer().await;
        let mut job = finished("repo-sync", "u1", 100, JobSpec::sync("repo", SyncJobOptions::default()));

        writer.write_job(&job).await.unwrap();
        job.status.state = JobState::Error;
        writer.write_job(&job).await.unwrap();

        let history = writer.list_history("ns", "repo", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "repo-sync-u1");
        assert_eq!(history[0].status.state, JobState::Error);
        assert!(!history[0].labels.contains_key(labels::CLAIM));
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_bounded() {
        let writer = setup_writer().await;
        for (uid, at) in [("u1", 100), ("u2", 300), ("u3", 200)] {
            let job = finished("repo-sync", uid, at, JobSpec::sync("repo", SyncJobOptions::default()));
            writer.write_job(&job).await.unwrap();
        }
        let other = finished(
            "other-pr-7",
            "u9",
            500,
            JobSpec::pull_request(
                "other",
                PullRequestJobOptions {
                    number: 7,
                    ..Default::default()
                },
            ),
        );
        writer.write_job(&other).await.unwrap();

        let history = writer.list_history("ns", "repo", 2).await.unwrap();
        let uids: Vec<_> = history.iter().filter_map(|h| h.original_uid()).collect();
        assert_eq!(uids, vec!["u2", "u3"]);
    }

    #[tokio::test]
    async fn test_find_by_original_uid() {
        let writer = setup_writer().await;
        let job = finished("repo-sync", "u1", 100, JobSpec::sync("repo", SyncJobOptions::default()));
        writer.write_job(&job).await.unwrap();

        let found = writer.find_by_original_uid("ns", "u1").await.unwrap().unwrap();
        assert_eq!(found.repository(), "repo");
        assert!(writer.find_by_original_uid("ns", "nope").await.unwrap().is_none());
        assert!(writer.find_by_original_uid("other", "u1").await.unwrap().is_none());
    }
}
