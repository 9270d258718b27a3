//! Process definition types.
//!
//! A process definition is an ordered list of step descriptors interpreted by
//! the runner. Definitions are data: they are parsed from YAML or JSON and
//! never carry code.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;

// ---------------------------------------------------------------------------
// Process Definition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepDescriptor>,
    /// Template evaluated against the final scope to build the run result.
    /// When absent, the result is an object of step outputs keyed by step ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One step of a process definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Unique within the definition; also the binding name (`steps.<id>`).
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Whether a failure of this step ends the run.
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl StepDescriptor {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn step_type(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// Step payload, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Run one registered task kind.
    Task {
        kind: String,
        #[serde(default)]
        args: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry: Option<RetryConfig>,
    },
    /// Fan out to several tasks and fan back in.
    Parallel {
        /// Falls back to the engine's configured default when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        policy: Option<ParallelPolicy>,
        branches: Vec<ParallelBranch>,
    },
    /// Suspend until a human decision is recorded.
    Breakpoint {
        title: String,
        question: String,
        #[serde(default)]
        summary: serde_json::Value,
        #[serde(default)]
        files: Vec<Artifact>,
        #[serde(default)]
        on_reject: RejectPolicy,
    },
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Task { .. } => "task",
            Self::Parallel { .. } => "parallel",
            Self::Breakpoint { .. } => "breakpoint",
        }
    }
}

/// One member of a parallel group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelBranch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// How a parallel group reacts to a failing branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPolicy {
    /// The first failure ends the group; in-flight branches are detached.
    #[default]
    FailFast,
    /// Every branch runs to completion; all failures are reported.
    WaitAll,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Fail,
    /// Record the failure as the step's output and keep going.
    Continue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectPolicy {
    #[default]
    Fail,
    Continue,
}

// ---------------------------------------------------------------------------
// Retry Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: RetryStrategy,
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Re-invoke the agent with the same request.
    #[default]
    Simple,
    /// Re-invoke with an extra instruction describing the previous failure.
    SelfCorrect,
}
