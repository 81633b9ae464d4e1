// SQLite RecordStore Implementation
//
// Version-guarded writes are single statements (`... WHERE version = ?`), so
// the compare-and-swap is atomic across every process sharing the file.

use async_trait::async_trait;
use provisioning_core::domain::{Job, JobKey};
use provisioning_core::port::{
    ClaimFilter, ListSelector, RecordStore, StoreError, StoreResult,
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{corrupt_record, is_unique_violation, map_sqlx_error};

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    version: i64,
    body: String,
}

impl JobRow {
    fn into_job(self) -> StoreResult<Job> {
        let mut job: Job = serde_json::from_str(&self.body).map_err(corrupt_record)?;
        // The column is authoritative; the body copy may lag by one write
        job.version = self.version as u64;
        Ok(job)
    }
}

fn encode(job: &Job) -> StoreResult<String> {
    serde_json::to_string(job).map_err(corrupt_record)
}

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Explain a guarded write that touched no row
    async fn missed_write(&self, key: &JobKey, expected: u64) -> StoreError {
        let current: Result<Option<i64>, _> =
            sqlx::query_scalar("SELECT version FROM jobs WHERE namespace = ? AND name = ?")
                .bind(&key.namespace)
                .bind(&key.name)
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(Some(actual)) => StoreError::Conflict {
                key: key.clone(),
                expected,
                actual: actual as u64,
            },
            Ok(None) => StoreError::NotFound(key.clone()),
            Err(e) => map_sqlx_error(e),
        }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn list(&self, selector: &ListSelector) -> StoreResult<Vec<Job>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT version, body FROM jobs WHERE 1 = 1");

        if let Some(namespace) = &selector.namespace {
            query.push(" AND namespace = ").push_bind(namespace.clone());
        }
        match selector.claim {
            ClaimFilter::Any => {}
            ClaimFilter::Unclaimed => {
                query.push(" AND claimed_at IS NULL");
            }
            ClaimFilter::ClaimedBefore(cutoff) => {
                query.push(" AND claimed_at < ").push_bind(cutoff);
            }
        }
        if let Some(after) = &selector.after {
            query
                .push(" AND (namespace, name) > (")
                .push_bind(after.namespace.clone())
                .push(", ")
                .push_bind(after.name.clone())
                .push(")");
        }
        query
            .push(" ORDER BY namespace, name LIMIT ")
            .push_bind(selector.limit as i64);

        let rows: Vec<JobRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn get(&self, key: &JobKey) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT version, body FROM jobs WHERE namespace = ? AND name = ?",
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.into_job(),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    async fn create(&self, job: &Job) -> StoreResult<Job> {
        let mut stored = job.clone();
        stored.version = 1;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (namespace, name, uid, version, repository, claimed_at, created_at, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&stored.namespace)
        .bind(&stored.name)
        .bind(&stored.uid)
        .bind(stored.version as i64)
        .bind(stored.repository())
        .bind(stored.claim_time())
        .bind(stored.created_at)
        .bind(encode(&stored)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(stored),
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists(job.key())),
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn update(&self, job: &Job) -> StoreResult<Job> {
        let key = job.key();
        let mut stored = job.clone();
        stored.version = job.version + 1;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET version = ?, uid = ?, repository = ?, claimed_at = ?, body = ?
            WHERE namespace = ? AND name = ? AND version = ?
            "#,
        )
        .bind(stored.version as i64)
        .bind(&stored.uid)
        .bind(stored.repository())
        .bind(stored.claim_time())
        .bind(encode(&stored)?)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(job.version as i64)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.missed_write(&key, job.version).await);
        }
        Ok(stored)
    }

    async fn delete(&self, key: &JobKey, expected_version: Option<u64>) -> StoreResult<()> {
        let result = match expected_version {
            Some(expected) => {
                sqlx::query("DELETE FROM jobs WHERE namespace = ? AND name = ? AND version = ?")
                    .bind(&key.namespace)
                    .bind(&key.name)
                    .bind(expected as i64)
                    .execute(&self.pool)
                    .await
            }
            None => {
                sqlx::query("DELETE FROM jobs WHERE namespace = ? AND name = ?")
                    .bind(&key.namespace)
                    .bind(&key.name)
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(match expected_version {
                Some(expected) => self.missed_write(key, expected).await,
                None => StoreError::NotFound(key.clone()),
            });
        }
        Ok(())
    }
}
