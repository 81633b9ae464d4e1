// Provisioning Infrastructure - SQLite Adapter
// Implements: RecordStore (versioned live jobs), HistoryWriter (archive)

mod connection;
mod error;
mod history_writer;
mod migration;
mod record_store;

pub use connection::create_pool;
pub use history_writer::SqliteHistoryWriter;
pub use migration::run_migrations;
pub use record_store::SqliteRecordStore;
pub use sqlx::SqlitePool;

// sqlx::Error cannot convert into core errors via From (orphan rules);
// adapters map explicitly with error::map_sqlx_error
