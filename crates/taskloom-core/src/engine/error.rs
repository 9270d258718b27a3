//! Task-level failure taxonomy.

use taskloom_types::task::EffectId;

use super::binding::BindingError;
use super::parallel::BranchPanic;

/// Typed failure of resolving or executing one task.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("unknown task kind '{0}'")]
    UnknownTaskKind(String),

    /// A builder rejected its arguments (e.g. a template placeholder had no value).
    #[error("invalid arguments for task kind '{kind}': {message}")]
    InvalidArguments { kind: String, message: String },

    #[error("agent invocation failed for {effect_id}: {message}")]
    AgentInvocation { effect_id: EffectId, message: String },

    #[error("malformed agent output for {effect_id}: {message}")]
    MalformedOutput { effect_id: EffectId, message: String },

    /// The task's declared output schema does not compile.
    #[error("invalid output schema for task kind '{kind}': {message}")]
    InvalidSchema { kind: String, message: String },

    #[error("agent output for {effect_id} violates its schema: {}", violations.join("; "))]
    SchemaViolation {
        effect_id: EffectId,
        violations: Vec<String>,
    },

    #[error("record store error: {0}")]
    Record(String),

    #[error("binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::UnknownTaskKind(_) => "unknown_task_kind",
            TaskError::InvalidArguments { .. } => "invalid_arguments",
            TaskError::AgentInvocation { .. } => "agent_invocation_error",
            TaskError::MalformedOutput { .. } => "malformed_output",
            TaskError::InvalidSchema { .. } => "invalid_schema",
            TaskError::SchemaViolation { .. } => "schema_violation",
            TaskError::Record(_) => "record_store",
            TaskError::Binding(_) => "binding",
            TaskError::Panicked(_) => "panicked",
        }
    }

    /// Only failures of the agent round-trip are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskError::AgentInvocation { .. }
                | TaskError::MalformedOutput { .. }
                | TaskError::SchemaViolation { .. }
        )
    }
}

impl From<BranchPanic> for TaskError {
    fn from(panic: BranchPanic) -> Self {
        TaskError::Panicked(panic.0)
    }
}
