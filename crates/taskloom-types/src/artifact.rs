//! Artifacts produced by tasks and accumulated by runs.

use serde::{Deserialize, Serialize};

/// A file (or other addressable output) a task reports having produced.
///
/// Runs only ever append artifacts; a failed run keeps every artifact that
/// was recorded before the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Location of the artifact, relative to the run's working directory.
    pub path: String,
    /// Format hint (e.g. "markdown", "json", "code").
    pub format: String,
    /// Optional display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Artifact {
    pub fn new(path: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: format.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
