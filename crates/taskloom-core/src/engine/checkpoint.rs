//! Durable checkpoint manager for run execution state.
//!
//! Wraps `RunRepository` to provide a higher-level API for recording run and
//! step transitions. Every transition is persisted before the runner moves
//! on, so `status`/`logs` reflect reality and a suspended or interrupted run
//! can be resumed.

use chrono::Utc;
use serde_json::Value;
use taskloom_types::run::{Run, RunStatus, StepLog, StepStatus};
use uuid::Uuid;

use crate::repository::RunRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Generic over `R: RunRepository` so it works with any storage backend.
pub struct CheckpointManager<R: RunRepository> {
    repo: R,
}

impl<R: RunRepository> CheckpointManager<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Step-level checkpoints
    // -----------------------------------------------------------------------

    /// Create a running step log entry. Returns its ID.
    pub async fn checkpoint_step_start(
        &self,
        run_id: Uuid,
        step_id: &str,
        step_type: &str,
    ) -> Result<Uuid, CheckpointError> {
        let log_id = Uuid::now_v7();
        let log = StepLog {
            id: log_id,
            run_id,
            step_id: step_id.to_string(),
            step_type: step_type.to_string(),
            status: StepStatus::Running,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };

        self.repo
            .create_step_log(&log)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            run_id = %run_id,
            step_id,
            log_id = %log_id,
            "checkpointed step start"
        );

        Ok(log_id)
    }

    pub async fn checkpoint_step_complete(
        &self,
        log_id: Uuid,
        output: Option<&Value>,
    ) -> Result<(), CheckpointError> {
        self.repo
            .update_step_status(&log_id, StepStatus::Completed, output, None)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(log_id = %log_id, "checkpointed step complete");
        Ok(())
    }

    /// Mark a step failed. `output` carries the recorded failure when the
    /// step caught it (`on_failure: continue`).
    pub async fn checkpoint_step_failed(
        &self,
        log_id: Uuid,
        error: &str,
        output: Option<&Value>,
    ) -> Result<(), CheckpointError> {
        self.repo
            .update_step_status(&log_id, StepStatus::Failed, output, Some(error))
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(log_id = %log_id, error, "checkpointed step failed");
        Ok(())
    }

    pub async fn checkpoint_step_waiting(&self, log_id: Uuid) -> Result<(), CheckpointError> {
        self.repo
            .update_step_status(&log_id, StepStatus::WaitingDecision, None, None)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(log_id = %log_id, "checkpointed step waiting for decision");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run-level checkpoints
    // -----------------------------------------------------------------------

    pub async fn checkpoint_run_created(&self, run: &Run) -> Result<(), CheckpointError> {
        self.repo
            .create_run(run)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        tracing::debug!(run_id = %run.id, process = %run.process_name, "checkpointed run creation");
        Ok(())
    }

    /// Persist the run snapshot (status, context, artifacts, result).
    pub async fn checkpoint_run(&self, run: &Run) -> Result<(), CheckpointError> {
        self.repo
            .save_run(run)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            run_id = %run.id,
            status = run.status.as_str(),
            artifacts = run.artifacts.len(),
            "checkpointed run"
        );
        Ok(())
    }

    pub async fn checkpoint_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), CheckpointError> {
        self.repo
            .update_run_status(&run_id, status, error)
            .await
            .map_err(|e| match e {
                taskloom_types::error::RepositoryError::NotFound => CheckpointError::RunNotFound(run_id),
                other => CheckpointError::Repository(other.to_string()),
            })?;

        tracing::debug!(run_id = %run_id, status = status.as_str(), "checkpointed run status");
        Ok(())
    }

    /// Persist a cancellation for a run that has not finished.
    ///
    /// A process driving the run observes the status before its next step.
    pub async fn request_cancel(&self, run_id: Uuid) -> Result<(), CheckpointError> {
        let status = self.run_status(run_id).await?;
        if status.is_terminal() {
            return Err(CheckpointError::Finished {
                run_id,
                status: status.as_str(),
            });
        }
        self.checkpoint_run_status(run_id, RunStatus::Cancelled, Some("cancelled by user"))
            .await?;

        tracing::info!(run_id = %run_id, "run cancelled");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Recovery helpers
    // -----------------------------------------------------------------------

    pub async fn load_run(&self, run_id: Uuid) -> Result<Run, CheckpointError> {
        self.repo
            .get_run(&run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::RunNotFound(run_id))
    }

    /// Current persisted status, used to observe cancellation requested by
    /// another process.
    pub async fn run_status(&self, run_id: Uuid) -> Result<RunStatus, CheckpointError> {
        self.load_run(run_id).await.map(|run| run.status)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("run {run_id} is {status} and cannot be resumed")]
    NotResumable { run_id: Uuid, status: &'static str },

    #[error("run {run_id} already finished ({status})")]
    Finished { run_id: Uuid, status: &'static str },

    #[error("run belongs to process '{expected}', not '{actual}'")]
    DefinitionMismatch { expected: String, actual: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
