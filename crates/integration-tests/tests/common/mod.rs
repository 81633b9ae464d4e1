//! Shared fixtures: file-backed SQLite databases and store wiring

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use provisioning_core::application::JobStore;
use provisioning_core::port::id_provider::UuidProvider;
use provisioning_core::port::TimeProvider;
use provisioning_infra_sqlite::{create_pool, run_migrations, SqlitePool, SqliteRecordStore};

/// SQLite file in the temp dir, removed (with its WAL files) on drop
pub struct TempDb {
    pub path: PathBuf,
    pub pool: SqlitePool,
}

impl TempDb {
    pub async fn new() -> Self {
        let path = std::env::temp_dir().join(format!("provisioning-{}.db", uuid::Uuid::new_v4()));
        let pool = create_pool(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        Self { path, pool }
    }

    /// Store over this database with its own record store handle
    pub fn store(&self, clock: Arc<dyn TimeProvider>, lease_expiry: Duration) -> JobStore {
        JobStore::new(
            Arc::new(SqliteRecordStore::new(self.pool.clone())),
            clock,
            Arc::new(UuidProvider),
        )
        .with_lease_expiry(lease_expiry)
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

/// Poll `check` every 10ms for up to five seconds
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
