//! SQLite run repository implementation.
//!
//! Implements `RunRepository` from `taskloom-core` using sqlx with split
//! read/write pools. Inputs, context, artifacts and results are stored as
//! JSON text. Step logs are append-only per pass over the run.

use chrono::Utc;
use sqlx::Row;
use taskloom_core::repository::RunRepository;
use taskloom_types::error::RepositoryError;
use taskloom_types::run::{Run, RunStatus, StepLog, StepStatus};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, from_json, parse_datetime, parse_enum, parse_uuid, to_json};

/// SQLite-backed implementation of `RunRepository`.
#[derive(Clone)]
pub struct SqliteRunRepository {
    pool: DatabasePool,
}

impl SqliteRunRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    id: String,
    process_name: String,
    process_version: String,
    status: String,
    inputs: String,
    context: String,
    artifacts: String,
    result: Option<String>,
    failed_step: Option<String>,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            process_name: row.try_get("process_name")?,
            process_version: row.try_get("process_version")?,
            status: row.try_get("status")?,
            inputs: row.try_get("inputs")?,
            context: row.try_get("context")?,
            artifacts: row.try_get("artifacts")?,
            result: row.try_get("result")?,
            failed_step: row.try_get("failed_step")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_run(self) -> Result<Run, RepositoryError> {
        Ok(Run {
            id: parse_uuid(&self.id)?,
            process_name: self.process_name,
            process_version: self.process_version,
            status: parse_enum("run status", &self.status)?,
            inputs: from_json("inputs", &self.inputs)?,
            context: from_json("context", &self.context)?,
            artifacts: from_json("artifacts", &self.artifacts)?,
            result: self
                .result
                .as_deref()
                .map(|s| from_json("result", s))
                .transpose()?,
            failed_step: self.failed_step,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct StepRow {
    id: String,
    run_id: String,
    step_id: String,
    step_type: String,
    status: String,
    output: Option<String>,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            step_type: row.try_get("step_type")?,
            status: row.try_get("status")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_step_log(self) -> Result<StepLog, RepositoryError> {
        Ok(StepLog {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            step_id: self.step_id,
            step_type: self.step_type,
            status: parse_enum("step status", &self.status)?,
            output: self
                .output
                .as_deref()
                .map(|s| from_json("step output", s))
                .transpose()?,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

fn step_status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Running => "running",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::WaitingDecision => "waiting_decision",
    }
}

fn rows_to_runs(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Run>, RepositoryError> {
    let mut runs = Vec::with_capacity(rows.len());
    for row in rows {
        let r = RunRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        runs.push(r.into_run()?);
    }
    Ok(runs)
}

// ---------------------------------------------------------------------------
// RunRepository impl
// ---------------------------------------------------------------------------

impl RunRepository for SqliteRunRepository {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO runs
               (id, process_name, process_version, status, inputs, context, artifacts,
                result, failed_step, error, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(&run.process_name)
        .bind(&run.process_version)
        .bind(run.status.as_str())
        .bind(to_json(&run.inputs)?)
        .bind(to_json(&run.context)?)
        .bind(to_json(&run.artifacts)?)
        .bind(run.result.as_ref().map(to_json).transpose()?)
        .bind(&run.failed_step)
        .bind(&run.error)
        .bind(format_datetime(&run.started_at))
        .bind(run.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("run {} already exists", run.id))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        Ok(())
    }

    async fn save_run(&self, run: &Run) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE runs SET
                 status = ?, context = ?, artifacts = ?, result = ?,
                 failed_step = ?, error = ?, completed_at = ?
               WHERE id = ?"#,
        )
        .bind(run.status.as_str())
        .bind(to_json(&run.context)?)
        .bind(to_json(&run.artifacts)?)
        .bind(run.result.as_ref().map(to_json).transpose()?)
        .bind(&run.failed_step)
        .bind(&run.error)
        .bind(run.completed_at.as_ref().map(format_datetime))
        .bind(run.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let completed_at = status.is_terminal().then(|| format_datetime(&Utc::now()));

        let result = sqlx::query(
            "UPDATE runs SET status = ?, error = COALESCE(?, error), completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(&completed_at)
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = RunRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(&self, process_name: Option<&str>, limit: u32) -> Result<Vec<Run>, RepositoryError> {
        // UUIDv7 text sorts by creation time.
        let rows = match process_name {
            Some(name) => {
                sqlx::query("SELECT * FROM runs WHERE process_name = ? ORDER BY id DESC LIMIT ?")
                    .bind(name)
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM runs ORDER BY id DESC LIMIT ?")
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_runs(&rows)
    }

    async fn list_interrupted_runs(&self) -> Result<Vec<Run>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM runs WHERE status = 'running' ORDER BY id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_to_runs(&rows)
    }

    async fn create_step_log(&self, step: &StepLog) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO step_logs
               (id, run_id, step_id, step_type, status, output, error, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(step.run_id.to_string())
        .bind(&step.step_id)
        .bind(&step.step_type)
        .bind(step_status_str(step.status))
        .bind(step.output.as_ref().map(to_json).transpose()?)
        .bind(&step.error)
        .bind(format_datetime(&step.started_at))
        .bind(step.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_step_status(
        &self,
        log_id: &Uuid,
        status: StepStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let completed_at = matches!(status, StepStatus::Completed | StepStatus::Failed)
            .then(|| format_datetime(&Utc::now()));
        let output = output.map(to_json).transpose()?;

        let result = sqlx::query(
            "UPDATE step_logs SET status = ?, output = COALESCE(?, output), error = COALESCE(?, error), completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(step_status_str(status))
        .bind(&output)
        .bind(error)
        .bind(&completed_at)
        .bind(log_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_step_logs(&self, run_id: &Uuid) -> Result<Vec<StepLog>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM step_logs WHERE run_id = ? ORDER BY id ASC")
            .bind(run_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            steps.push(r.into_step_log()?);
        }
        Ok(steps)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
