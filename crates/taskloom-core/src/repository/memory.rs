//! In-process store implementations.
//!
//! Each store is a cheap `Clone` handle over shared maps, so a clone behaves
//! like a second connection to the same storage.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use taskloom_types::breakpoint::{Breakpoint, Resolution};
use taskloom_types::error::RepositoryError;
use taskloom_types::run::{Run, RunStatus, StepLog, StepStatus};
use uuid::Uuid;

use super::{BreakpointStore, RecordStore, RunRepository};

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InMemoryRunRepository {
    runs: Arc<DashMap<Uuid, Run>>,
    steps: Arc<DashMap<Uuid, StepLog>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunRepository for InMemoryRunRepository {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        match self.runs.entry(run.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "run {} already exists",
                run.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
                Ok(())
            }
        }
    }

    async fn save_run(&self, run: &Run) -> Result<(), RepositoryError> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut run = self.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        run.status = status;
        if let Some(error) = error {
            run.error = Some(error.to_string());
        }
        if status.is_terminal() {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|r| r.clone()))
    }

    async fn list_runs(
        &self,
        process_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Run>, RepositoryError> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|r| process_name.is_none_or(|name| r.process_name == name))
            .map(|r| r.clone())
            .collect();
        runs.sort_by(|a, b| b.id.cmp(&a.id));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn list_interrupted_runs(&self) -> Result<Vec<Run>, RepositoryError> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|r| r.status == RunStatus::Running)
            .map(|r| r.clone())
            .collect();
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(runs)
    }

    async fn create_step_log(&self, step: &StepLog) -> Result<(), RepositoryError> {
        self.steps.insert(step.id, step.clone());
        Ok(())
    }

    async fn update_step_status(
        &self,
        log_id: &Uuid,
        status: StepStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut step = self.steps.get_mut(log_id).ok_or(RepositoryError::NotFound)?;
        step.status = status;
        if let Some(output) = output {
            step.output = Some(output.clone());
        }
        if let Some(error) = error {
            step.error = Some(error.to_string());
        }
        if matches!(status, StepStatus::Completed | StepStatus::Failed) {
            step.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_step_logs(&self, run_id: &Uuid) -> Result<Vec<StepLog>, RepositoryError> {
        let mut steps: Vec<StepLog> = self
            .steps
            .iter()
            .filter(|s| s.run_id == *run_id)
            .map(|s| s.clone())
            .collect();
        steps.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(steps)
    }
}

// ---------------------------------------------------------------------------
// Breakpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InMemoryBreakpointStore {
    breakpoints: Arc<DashMap<String, Breakpoint>>,
}

impl InMemoryBreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BreakpointStore for InMemoryBreakpointStore {
    async fn save_breakpoint(&self, breakpoint: &Breakpoint) -> Result<Breakpoint, RepositoryError> {
        let stored = self
            .breakpoints
            .entry(breakpoint.id.clone())
            .or_insert_with(|| breakpoint.clone());
        Ok(stored.clone())
    }

    async fn get_breakpoint(&self, id: &str) -> Result<Option<Breakpoint>, RepositoryError> {
        Ok(self.breakpoints.get(id).map(|bp| bp.clone()))
    }

    async fn resolve_breakpoint(
        &self,
        id: &str,
        resolution: &Resolution,
    ) -> Result<Breakpoint, RepositoryError> {
        // The shard lock held by `get_mut` makes check-and-set atomic.
        let mut bp = self.breakpoints.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if !bp.apply(resolution.clone(), Utc::now()) {
            return Err(RepositoryError::Conflict(format!(
                "breakpoint {id} is already {}",
                bp.state.as_str()
            )));
        }
        Ok(bp.clone())
    }

    async fn list_breakpoints(
        &self,
        run_id: Option<&Uuid>,
        pending_only: bool,
    ) -> Result<Vec<Breakpoint>, RepositoryError> {
        let mut breakpoints: Vec<Breakpoint> = self
            .breakpoints
            .iter()
            .filter(|bp| run_id.is_none_or(|id| bp.run_id == *id))
            .filter(|bp| !pending_only || !bp.state.is_resolved())
            .map(|bp| bp.clone())
            .collect();
        breakpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(breakpoints)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<DashMap<(Uuid, String), serde_json::Value>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents across all runs.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for InMemoryRecordStore {
    async fn write_record(
        &self,
        run_id: &Uuid,
        path: &str,
        document: &serde_json::Value,
    ) -> Result<(), RepositoryError> {
        self.records
            .insert((*run_id, path.to_string()), document.clone());
        Ok(())
    }

    async fn read_record(
        &self,
        run_id: &Uuid,
        path: &str,
    ) -> Result<Option<serde_json::Value>, RepositoryError> {
        Ok(self
            .records
            .get(&(*run_id, path.to_string()))
            .map(|doc| doc.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskloom_types::breakpoint::{BreakpointContext, BreakpointRequest, Decision};

    fn pending(id: &str, run_id: Uuid) -> Breakpoint {
        Breakpoint::pending(
            id,
            "review",
            BreakpointRequest {
                question: "ok?".to_string(),
                title: "Review".to_string(),
                context: BreakpointContext {
                    run_id,
                    summary: json!({}),
                    files: vec![],
                },
            },
        )
    }

    #[tokio::test]
    async fn test_run_status_update_and_listing() {
        let repo = InMemoryRunRepository::new();
        let run = Run::new(Uuid::now_v7(), "demo", "1.0.0", json!({}));
        repo.create_run(&run).await.unwrap();
        assert!(repo.create_run(&run).await.is_err());

        assert_eq!(repo.list_interrupted_runs().await.unwrap().len(), 1);
        repo.update_run_status(&run.id, RunStatus::Cancelled, None)
            .await
            .unwrap();

        let stored = repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Cancelled);
        assert!(stored.completed_at.is_some());
        assert!(repo.list_interrupted_runs().await.unwrap().is_empty());
        assert_eq!(repo.list_runs(Some("other"), 10).await.unwrap().len(), 0);
        assert_eq!(repo.list_runs(Some("demo"), 10).await.unwrap().len(), 1);

        let missing = repo
            .update_run_status(&Uuid::now_v7(), RunStatus::Failed, None)
            .await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_breakpoint_resolves_once() {
        let store = InMemoryBreakpointStore::new();
        let run_id = Uuid::now_v7();
        store.save_breakpoint(&pending("bp-1", run_id)).await.unwrap();

        let approve = Resolution {
            decision: Decision::Approve,
            payload: None,
        };
        store.resolve_breakpoint("bp-1", &approve).await.unwrap();

        let again = store.resolve_breakpoint("bp-1", &approve).await;
        assert!(matches!(again, Err(RepositoryError::Conflict(_))));

        let unknown = store.resolve_breakpoint("bp-404", &approve).await;
        assert!(matches!(unknown, Err(RepositoryError::NotFound)));

        // Saving again keeps the resolved copy.
        let stored = store.save_breakpoint(&pending("bp-1", run_id)).await.unwrap();
        assert!(stored.state.is_resolved());
        assert!(store.list_breakpoints(Some(&run_id), true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_store_clone_shares_documents() {
        let store = InMemoryRecordStore::new();
        let run_id = Uuid::now_v7();
        store
            .write_record(&run_id, "tasks/e/output.json", &json!({"a": 1}))
            .await
            .unwrap();

        let other = store.clone();
        let doc = other.read_record(&run_id, "tasks/e/output.json").await.unwrap();
        assert_eq!(doc, Some(json!({"a": 1})));
        assert!(other.read_record(&run_id, "tasks/x/output.json").await.unwrap().is_none());
    }
}
