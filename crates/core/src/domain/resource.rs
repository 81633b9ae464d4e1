// Resource-level outcomes and their per-kind aggregates

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a job did to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    Created,
    Updated,
    Deleted,
    Ignored,
    Renamed,
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceAction::Created => "created",
            ResourceAction::Updated => "updated",
            ResourceAction::Deleted => "deleted",
            ResourceAction::Ignored => "ignored",
            ResourceAction::Renamed => "renamed",
        };
        f.write_str(s)
    }
}

/// Outcome for one affected resource. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResourceResult {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub path: String,
    pub action: ResourceAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl JobResourceResult {
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        kind: impl Into<String>,
        path: impl Into<String>,
        action: ResourceAction,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            kind: kind.into(),
            path: path.into(),
            action,
            error: None,
            warning: None,
        }
    }

    /// Attach an error; an error always replaces a warning
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.warning = None;
        self
    }

    /// Attach a warning unless the result already carries an error
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        if self.error.is_none() {
            self.warning = Some(warning.into());
        }
        self
    }

    /// Human readable location used in status messages
    pub fn describe(&self) -> String {
        match (self.path.is_empty(), self.name.is_empty()) {
            (false, _) => self.path.clone(),
            (true, false) => format!("{}/{}", self.kind, self.name),
            (true, true) => self.kind.clone(),
        }
    }
}

/// Aggregate counters for one (group, kind)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResourceSummary {
    pub group: String,
    pub kind: String,
    pub create: u64,
    pub update: u64,
    pub delete: u64,
    pub noop: u64,
    /// create + update + delete
    pub write: u64,
    pub error: u64,
    pub warning: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl JobResourceSummary {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }
}
