//! Event types for the taskloom engine event bus.
//!
//! `EngineEvent` is broadcast during run execution. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle events emitted while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RunStarted {
        run_id: Uuid,
        process_name: String,
        resumed: bool,
    },

    StepStarted {
        run_id: Uuid,
        step_id: String,
        step_type: String,
    },

    /// A task finished; `cached` is true when its output record already existed.
    TaskCompleted {
        run_id: Uuid,
        step_id: String,
        effect_id: String,
        kind: String,
        duration_ms: u64,
        cached: bool,
    },

    StepCompleted {
        run_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },

    /// A step failed. `caught` is true when `on_failure: continue` absorbed it.
    StepFailed {
        run_id: Uuid,
        step_id: String,
        error: String,
        caught: bool,
    },

    BreakpointRaised {
        run_id: Uuid,
        breakpoint_id: String,
        title: String,
    },

    BreakpointResolved {
        run_id: Uuid,
        breakpoint_id: String,
        decision: String,
    },

    RunSuspended {
        run_id: Uuid,
        step_id: String,
        breakpoint_id: String,
    },

    RunCompleted {
        run_id: Uuid,
        process_name: String,
        duration_ms: u64,
        artifacts: usize,
    },

    RunFailed {
        run_id: Uuid,
        process_name: String,
        failed_step: String,
        error: String,
    },

    RunCancelled { run_id: Uuid },
}

impl EngineEvent {
    /// Every event belongs to exactly one run.
    pub fn run_id(&self) -> Uuid {
        match self {
            EngineEvent::RunStarted { run_id, .. }
            | EngineEvent::StepStarted { run_id, .. }
            | EngineEvent::TaskCompleted { run_id, .. }
            | EngineEvent::StepCompleted { run_id, .. }
            | EngineEvent::StepFailed { run_id, .. }
            | EngineEvent::BreakpointRaised { run_id, .. }
            | EngineEvent::BreakpointResolved { run_id, .. }
            | EngineEvent::RunSuspended { run_id, .. }
            | EngineEvent::RunCompleted { run_id, .. }
            | EngineEvent::RunFailed { run_id, .. }
            | EngineEvent::RunCancelled { run_id } => *run_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineEvent::RunCompleted { .. }
                | EngineEvent::RunFailed { .. }
                | EngineEvent::RunCancelled { .. }
                | EngineEvent::RunSuspended { .. }
        )
    }
}
