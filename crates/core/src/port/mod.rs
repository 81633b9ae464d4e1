// Port Layer - Interfaces for external collaborators

pub mod history;
pub mod id_provider; // For deterministic testing
pub mod progress;
pub mod record_store;
pub mod time_provider;
pub mod worker;

// Re-exports
pub use history::HistoryWriter;
pub use id_provider::IdProvider;
pub use progress::ProgressRecorder;
pub use record_store::{ClaimFilter, ListSelector, RecordStore, StoreError, StoreResult};
pub use time_provider::TimeProvider;
pub use worker::{JobContext, RepositoryRef, Worker};
