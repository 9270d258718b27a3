//! Run repository trait definition.
//!
//! Defines the storage interface for run records and step logs. The
//! infrastructure layer implements it with SQLite persistence.

use taskloom_types::error::RepositoryError;
use taskloom_types::run::{Run, RunStatus, StepLog, StepStatus};
use uuid::Uuid;

/// Repository trait for run persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RunRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a new run record.
    fn create_run(
        &self,
        run: &Run,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist every mutable field of a run (status, context, artifacts,
    /// result, failure details, completion time).
    fn save_run(
        &self,
        run: &Run,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update only a run's status and error. Returns `NotFound` for unknown IDs.
    fn update_run_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Run>, RepositoryError>> + Send;

    /// List runs, newest first, optionally filtered by process name.
    fn list_runs(
        &self,
        process_name: Option<&str>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, RepositoryError>> + Send;

    /// List runs that are still marked `running` (interrupted processes).
    fn list_interrupted_runs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn create_step_log(
        &self,
        step: &StepLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a step log's status and optionally its output/error.
    fn update_step_status(
        &self,
        log_id: &Uuid,
        status: StepStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all step logs for a run, oldest first.
    fn list_step_logs(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepLog>, RepositoryError>> + Send;
}
