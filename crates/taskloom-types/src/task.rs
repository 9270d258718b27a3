//! Task domain types: specs produced by builders, invocations scheduled by the
//! runner, the agent request contract, and the persisted input/output records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::Artifact;

// ---------------------------------------------------------------------------
// Effect ID
// ---------------------------------------------------------------------------

/// Deterministic identifier of a single task execution within a run.
///
/// Derived from the run ID, the task kind and the step position, so replaying
/// the same definition yields the same IDs and finds the same records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(String);

impl EffectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Task spec
// ---------------------------------------------------------------------------

/// What the external agent is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContract {
    pub role: String,
    pub task: String,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// JSON Schema the agent's output must satisfy. `null` accepts anything.
    #[serde(default)]
    pub output_schema: serde_json::Value,
}

fn default_output_format() -> String {
    "JSON".to_string()
}

impl AgentContract {
    /// A contract with no context, instructions or schema.
    pub fn new(role: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            task: task.into(),
            context: serde_json::Value::Null,
            instructions: Vec::new(),
            output_format: default_output_format(),
            output_schema: serde_json::Value::Null,
        }
    }
}

/// Record locations of a task, relative to the run's record root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIo {
    pub input_path: String,
    pub output_path: String,
}

impl TaskIo {
    /// Standard layout: `tasks/<effect_id>/{input,output}.json`.
    pub fn for_effect(effect_id: &EffectId) -> Self {
        Self {
            input_path: format!("tasks/{effect_id}/input.json"),
            output_path: format!("tasks/{effect_id}/output.json"),
        }
    }
}

/// Fully-resolved description of one task, as returned by a registered builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: String,
    pub title: String,
    pub agent: AgentContract,
    pub io: TaskIo,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A task scheduled for execution within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInvocation {
    pub effect_id: EffectId,
    /// Step (or parallel branch) that scheduled this task.
    pub step_id: String,
    pub kind: String,
    /// Arguments after binding resolution.
    pub args: serde_json::Value,
    pub spec: TaskSpec,
}

// ---------------------------------------------------------------------------
// Agent request contract
// ---------------------------------------------------------------------------

/// Request handed to the external agent for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub effect_id: EffectId,
    pub kind: String,
    pub role: String,
    pub task: String,
    pub context: serde_json::Value,
    pub instructions: Vec<String>,
    pub output_format: String,
    pub output_schema: serde_json::Value,
}

impl AgentRequest {
    pub fn from_spec(effect_id: &EffectId, spec: &TaskSpec) -> Self {
        Self {
            effect_id: effect_id.clone(),
            kind: spec.kind.clone(),
            role: spec.agent.role.clone(),
            task: spec.agent.task.clone(),
            context: spec.agent.context.clone(),
            instructions: spec.agent.instructions.clone(),
            output_format: spec.agent.output_format.clone(),
            output_schema: spec.agent.output_schema.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results and records
// ---------------------------------------------------------------------------

/// Outcome of a successful task execution. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub effect_id: EffectId,
    pub kind: String,
    pub success: bool,
    /// Schema-validated agent output.
    pub output: serde_json::Value,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    pub elapsed_ms: u64,
}

/// Contents of `input.json`, written before the agent is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRecord {
    pub effect_id: EffectId,
    pub run_id: Uuid,
    pub step_id: String,
    pub kind: String,
    pub title: String,
    pub args: serde_json::Value,
    pub agent: AgentContract,
    #[serde(default)]
    pub labels: Vec<String>,
    pub written_at: DateTime<Utc>,
}

/// Contents of `output.json`, written after validation succeeds.
///
/// Its presence marks the effect as done: re-execution returns the stored
/// result instead of invoking the agent again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub effect_id: EffectId,
    pub kind: String,
    pub output: serde_json::Value,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl OutputRecord {
    pub fn from_result(result: &TaskResult, completed_at: DateTime<Utc>) -> Self {
        Self {
            effect_id: result.effect_id.clone(),
            kind: result.kind.clone(),
            output: result.output.clone(),
            artifacts: result.artifacts.clone(),
            elapsed_ms: result.elapsed_ms,
            completed_at,
        }
    }

    pub fn into_result(self) -> TaskResult {
        TaskResult {
            effect_id: self.effect_id,
            kind: self.kind,
            success: true,
            output: self.output,
            artifacts: self.artifacts,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_spec() -> TaskSpec {
        let effect_id = EffectId::new("research-0123456789abcdef");
        TaskSpec {
            kind: "research".to_string(),
            title: "Research the topic".to_string(),
            agent: AgentContract {
                role: "analyst".to_string(),
                task: "Summarize findings".to_string(),
                context: json!({"topic": "rust"}),
                instructions: vec!["Be brief".to_string()],
                output_format: "JSON".to_string(),
                output_schema: json!({"type": "object"}),
            },
            io: TaskIo::for_effect(&effect_id),
            labels: vec!["phase-1".to_string()],
        }
    }

    #[test]
    fn test_io_layout_follows_effect_id() {
        let io = TaskIo::for_effect(&EffectId::new("plan-ab12"));
        assert_eq!(io.input_path, "tasks/plan-ab12/input.json");
        assert_eq!(io.output_path, "tasks/plan-ab12/output.json");
    }

    #[test]
    fn test_agent_request_uses_camel_case_contract() {
        let spec = sample_spec();
        let request = AgentRequest::from_spec(&EffectId::new("e-1"), &spec);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["effectId"], "e-1");
        assert_eq!(value["outputFormat"], "JSON");
        assert_eq!(value["outputSchema"], json!({"type": "object"}));
        assert_eq!(value["instructions"], json!(["Be brief"]));
    }

    #[test]
    fn test_agent_contract_defaults() {
        let contract: AgentContract =
            serde_json::from_value(json!({"role": "writer", "task": "Draft"})).unwrap();
        assert_eq!(contract.output_format, "JSON");
        assert!(contract.output_schema.is_null());
        assert!(contract.instructions.is_empty());
    }

    #[test]
    fn test_output_record_restores_result() {
        let result = TaskResult {
            effect_id: EffectId::new("e-2"),
            kind: "implement".to_string(),
            success: true,
            output: json!({"ok": true}),
            artifacts: vec![Artifact::new("src/lib.rs", "code")],
            elapsed_ms: 42,
        };
        let record = OutputRecord::from_result(&result, Utc::now());
        assert_eq!(record.into_result(), result);
    }
}
