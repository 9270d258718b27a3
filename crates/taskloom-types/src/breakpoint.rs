//! Breakpoint types: the persisted decision state machine and the presentation
//! contract handed to whoever answers it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::Artifact;

/// `pending -> {approved, rejected, edited}`. Resolved states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointState {
    Pending,
    Approved,
    Rejected,
    Edited,
}

impl BreakpointState {
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Edited => "edited",
        }
    }
}

/// The human's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    /// Approve with a replacement payload.
    Edit,
}

impl Decision {
    pub fn resulting_state(self) -> BreakpointState {
        match self {
            Self::Approve => BreakpointState::Approved,
            Self::Reject => BreakpointState::Rejected,
            Self::Edit => BreakpointState::Edited,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Edit => "edit",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Self::Approve),
            "reject" | "rejected" => Ok(Self::Reject),
            "edit" | "edited" => Ok(Self::Edit),
            other => Err(format!(
                "unknown decision '{other}' (expected approve, reject or edit)"
            )),
        }
    }
}

/// `{decision, payload?}` as delivered by `resolve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Context shown alongside the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointContext {
    pub run_id: Uuid,
    #[serde(default)]
    pub summary: serde_json::Value,
    #[serde(default)]
    pub files: Vec<Artifact>,
}

/// Presentation contract: `{question, title, context}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointRequest {
    pub question: String,
    pub title: String,
    pub context: BreakpointContext,
}

/// A persisted breakpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Deterministic per run and step.
    pub id: String,
    pub run_id: Uuid,
    pub step_id: String,
    pub title: String,
    pub question: String,
    pub context: BreakpointContext,
    pub state: BreakpointState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Breakpoint {
    pub fn pending(id: impl Into<String>, step_id: impl Into<String>, request: BreakpointRequest) -> Self {
        Self {
            id: id.into(),
            run_id: request.context.run_id,
            step_id: step_id.into(),
            title: request.title,
            question: request.question,
            context: request.context,
            state: BreakpointState::Pending,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn presentation(&self) -> BreakpointRequest {
        BreakpointRequest {
            question: self.question.clone(),
            title: self.title.clone(),
            context: self.context.clone(),
        }
    }

    /// Apply a resolution. Returns `false` (leaving `self` untouched) when the
    /// breakpoint was already resolved.
    pub fn apply(&mut self, resolution: Resolution, at: DateTime<Utc>) -> bool {
        if self.state.is_resolved() {
            return false;
        }
        self.state = resolution.decision.resulting_state();
        self.resolution = Some(resolution);
        self.resolved_at = Some(at);
        true
    }
}
