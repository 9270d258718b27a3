//! Run tracking types: the run record and per-step execution logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::Artifact;

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Parked at an unresolved breakpoint; continue with `resume`.
    Suspended,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Status of one step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    WaitingDecision,
}

/// A single execution of a process definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// UUIDv7, fixed for the lifetime of the run.
    pub id: Uuid,
    pub process_name: String,
    pub process_version: String,
    pub status: RunStatus,
    pub inputs: serde_json::Value,
    /// Step outputs accumulated so far (`{"steps": {...}}`).
    pub context: serde_json::Value,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        id: Uuid,
        process_name: impl Into<String>,
        process_version: impl Into<String>,
        inputs: serde_json::Value,
    ) -> Self {
        Self {
            id,
            process_name: process_name.into(),
            process_version: process_version.into(),
            status: RunStatus::Running,
            inputs,
            context: serde_json::json!({}),
            artifacts: Vec::new(),
            result: None,
            failed_step: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Execution log for one step of a run. A resumed run appends new entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: String,
    /// `task`, `parallel` or `breakpoint`.
    pub step_type: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Suspended.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_strings_match_serde() {
        for status in [
            RunStatus::Running,
            RunStatus::Suspended,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(serde_json::to_value(status).unwrap(), json!(status.as_str()));
        }
        assert_eq!(
            serde_json::to_value(StepStatus::WaitingDecision).unwrap(),
            json!("waiting_decision")
        );
    }

    #[test]
    fn test_new_run_starts_running() {
        let run = Run::new(Uuid::now_v7(), "demo", "1.0.0", json!({"topic": "x"}));
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.artifacts.is_empty());
        assert!(run.completed_at.is_none());
    }
}
