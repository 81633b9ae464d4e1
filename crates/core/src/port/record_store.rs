// Versioned Record Store Port (Interface)
//
// The only synchronization primitive in the system: every update and delete
// carries the version observed at read time and fails with Conflict when the
// stored version has moved on.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Job, JobKey};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobKey),

    #[error("job {0} already exists")]
    AlreadyExists(JobKey),

    #[error("version conflict on job {key}: expected {expected}, found {actual}")]
    Conflict {
        key: JobKey,
        expected: u64,
        actual: u64,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which claim state a listing should match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimFilter {
    Any,
    /// No claim label: eligible for claiming
    Unclaimed,
    /// Claimed strictly before the given epoch ms
    ClaimedBefore(i64),
}

/// List query. Results are ordered by (namespace, name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSelector {
    pub namespace: Option<String>,
    pub claim: ClaimFilter,
    pub limit: usize,
    /// Only return keys strictly after this one (paging)
    pub after: Option<JobKey>,
}

impl ListSelector {
    pub fn unclaimed(limit: usize) -> Self {
        Self {
            namespace: None,
            claim: ClaimFilter::Unclaimed,
            limit,
            after: None,
        }
    }

    pub fn claimed_before(cutoff_millis: i64, limit: usize) -> Self {
        Self {
            namespace: None,
            claim: ClaimFilter::ClaimedBefore(cutoff_millis),
            limit,
            after: None,
        }
    }

    pub fn all(limit: usize) -> Self {
        Self {
            namespace: None,
            claim: ClaimFilter::Any,
            limit,
            after: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn after(mut self, key: Option<JobKey>) -> Self {
        self.after = key;
        self
    }

    /// Does a job satisfy this selector (ignoring limit)
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(ns) = &self.namespace {
            if &job.namespace != ns {
                return false;
            }
        }
        if let Some(after) = &self.after {
            if &job.key() <= after {
                return false;
            }
        }
        match self.claim {
            ClaimFilter::Any => true,
            ClaimFilter::Unclaimed => !job.is_claimed(),
            ClaimFilter::ClaimedBefore(cutoff) => {
                job.claim_time().map(|t| t < cutoff).unwrap_or(false)
            }
        }
    }
}

/// Repository interface for live job records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List jobs matching the selector, ordered by key
    async fn list(&self, selector: &ListSelector) -> StoreResult<Vec<Job>>;

    /// Fetch one job
    async fn get(&self, key: &JobKey) -> StoreResult<Job>;

    /// Create a job; fails with AlreadyExists if the key is taken.
    /// Returns the stored copy with its first version.
    async fn create(&self, job: &Job) -> StoreResult<Job>;

    /// Replace a job if `job.version` still matches the stored version.
    /// Returns the stored copy with its new version.
    async fn update(&self, job: &Job) -> StoreResult<Job>;

    /// Delete a job, optionally guarded by the version the caller observed
    async fn delete(&self, key: &JobKey, expected_version: Option<u64>) -> StoreResult<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    /// Which operation an injected failure applies to
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Op {
        List,
        Get,
        Create,
        Update,
        Delete,
    }

    /// In-memory versioned store with compare-and-swap semantics
    #[derive(Default)]
    pub struct InMemoryRecordStore {
        records: Mutex<BTreeMap<JobKey, Job>>,
        failures: Mutex<VecDeque<(Op, StoreError)>>,
    }

    impl InMemoryRecordStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next call of `op` with `err`
        pub fn fail_next(&self, op: Op, err: StoreError) {
            self.failures.lock().unwrap().push_back((op, err));
        }

        /// Current stored copy, bypassing version checks
        pub fn snapshot(&self, key: &JobKey) -> Option<Job> {
            self.records.lock().unwrap().get(key).cloned()
        }

        pub fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Overwrite a record directly (test setup), bumping its version
        pub fn put(&self, mut job: Job) -> Job {
            let mut records = self.records.lock().unwrap();
            let current = records.get(&job.key()).map(|j| j.version).unwrap_or(0);
            job.version = current + 1;
            records.insert(job.key(), job.clone());
            job
        }

        fn injected(&self, op: Op) -> StoreResult<()> {
            let mut failures = self.failures.lock().unwrap();
            if let Some(pos) = failures.iter().position(|(o, _)| *o == op) {
                if let Some((_, err)) = failures.remove(pos) {
                    return Err(err);
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RecordStore for InMemoryRecordStore {
        async fn list(&self, selector: &ListSelector) -> StoreResult<Vec<Job>> {
            self.injected(Op::List)?;
            let records = self.records.lock().unwrap();
            Ok(records
                .values()
                .filter(|job| selector.matches(job))
                .take(selector.limit)
                .cloned()
                .collect())
        }

        async fn get(&self, key: &JobKey) -> StoreResult<Job> {
            self.injected(Op::Get)?;
            self.records
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.clone()))
        }

        async fn create(&self, job: &Job) -> StoreResult<Job> {
            self.injected(Op::Create)?;
            let mut records = self.records.lock().unwrap();
            let key = job.key();
            if records.contains_key(&key) {
                return Err(StoreError::AlreadyExists(key));
            }
            let mut stored = job.clone();
            stored.version = 1;
            records.insert(key, stored.clone());
            Ok(stored)
        }

        async fn update(&self, job: &Job) -> StoreResult<Job> {
            self.injected(Op::Update)?;
            let mut records = self.records.lock().unwrap();
            let key = job.key();
            let current = records
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            if current.version != job.version {
                return Err(StoreError::Conflict {
                    key,
                    expected: job.version,
                    actual: current.version,
                });
            }
            let mut stored = job.clone();
            stored.version = current.version + 1;
            records.insert(key, stored.clone());
            Ok(stored)
        }

        async fn delete(&self, key: &JobKey, expected_version: Option<u64>) -> StoreResult<()> {
            self.injected(Op::Delete)?;
            let mut records = self.records.lock().unwrap();
            let current = records
                .get(key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            if let Some(expected) = expected_version {
                if current.version != expected {
                    return Err(StoreError::Conflict {
                        key: key.clone(),
                        expected,
                        actual: current.version,
                    });
                }
            }
            records.remove(key);
            Ok(())
        }
    }
}
