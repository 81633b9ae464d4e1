// SQLite Connection Pool Setup

use provisioning_core::port::{StoreError, StoreResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::map_sqlx_error;

/// Create SQLite connection pool with WAL mode.
///
/// In-memory databases are private to one connection, so they get a pool of one.
pub async fn create_pool(database_url: &str) -> StoreResult<SqlitePool> {
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| StoreError::Backend(format!("invalid database url {database_url}: {e}")))?
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);
    let options = if in_memory {
        options
    } else {
        options.journal_mode(SqliteJournalMode::Wal)
    };

    SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 10 })
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)
}
