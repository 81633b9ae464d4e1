// Tenant-scoped identity handed to workers

use serde::{Deserialize, Serialize};

/// Subject name the job service acts as
pub const SERVICE_SUBJECT: &str = "provisioning-jobs";

/// Capability limited to a single namespace.
///
/// Built fresh for every claimed job so a worker can only act inside the
/// tenant that owns the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub subject: String,
    pub namespace: String,
}

impl ServiceIdentity {
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            subject: SERVICE_SUBJECT.to_string(),
            namespace: namespace.into(),
        }
    }

    pub fn allows(&self, namespace: &str) -> bool {
        self.namespace == namespace
    }
}
