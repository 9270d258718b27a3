//! Filesystem-backed `RecordStore`.
//!
//! Documents live at `{root}/runs/{run_id}/{path}`. Writes go to a sibling
//! temp file first and are renamed into place, so a crash mid-write never
//! leaves a truncated `output.json` that would later read as a completed
//! effect.

use std::path::{Component, Path, PathBuf};

use taskloom_core::repository::RecordStore;
use taskloom_types::error::RepositoryError;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every record of `run_id`.
    pub fn run_dir(&self, run_id: &Uuid) -> PathBuf {
        self.root.join("runs").join(run_id.to_string())
    }

    fn resolve(&self, run_id: &Uuid, path: &str) -> Result<PathBuf, RepositoryError> {
        let relative = Path::new(path);
        let escapes = path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(RepositoryError::Io(format!("invalid record path: '{path}'")));
        }
        Ok(self.run_dir(run_id).join(relative))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> RepositoryError {
    RepositoryError::Io(format!("{}: {err}", path.display()))
}

impl RecordStore for FsRecordStore {
    async fn write_record(
        &self,
        run_id: &Uuid,
        path: &str,
        document: &serde_json::Value,
    ) -> Result<(), RepositoryError> {
        let target = self.resolve(run_id, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| RepositoryError::Io(format!("serialize record: {e}")))?;

        let mut tmp_name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(format!(".{}.tmp", Uuid::now_v7().simple()));
        let tmp = target.with_file_name(tmp_name);

        tokio::fs::write(&tmp, &bytes).await.map_err(|e| io_error(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(&target, e));
        }

        tracing::trace!(run_id = %run_id, path, bytes = bytes.len(), "wrote record");
        Ok(())
    }

    async fn read_record(&self, run_id: &Uuid, path: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        let target = self.resolve(run_id, path)?;
        let bytes = match tokio::fs::read(&target).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&target, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RepositoryError::Io(format!("{}: invalid JSON: {e}", target.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        let run_id = Uuid::now_v7();

        store
            .write_record(&run_id, "tasks/plan-1/output.json", &json!({"ok": true}))
            .await
            .unwrap();
        let doc = store.read_record(&run_id, "tasks/plan-1/output.json").await.unwrap();
        assert_eq!(doc, Some(json!({"ok": true})));

        let on_disk = dir
            .path()
            .join("runs")
            .join(run_id.to_string())
            .join("tasks/plan-1/output.json");
        assert!(on_disk.exists());
    }

    #[tokio::test]
    async fn test_missing_record_is_none() {
        let dir = tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        let doc = store.read_record(&Uuid::now_v7(), "tasks/x/output.json").await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_records_survive_a_new_store_instance() {
        let dir = tempdir().unwrap();
        let run_id = Uuid::now_v7();
        FsRecordStore::new(dir.path())
            .write_record(&run_id, "tasks/a/input.json", &json!({"args": [1, 2]}))
            .await
            .unwrap();

        let reopened = FsRecordStore::new(dir.path());
        let doc = reopened.read_record(&run_id, "tasks/a/input.json").await.unwrap();
        assert_eq!(doc.unwrap()["args"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_executed_task_is_restored_after_restart() {
        use taskloom_core::agent::scripted::ScriptedAgent;
        use taskloom_core::engine::registry::TaskContext;
        use taskloom_core::engine::{RunContext, TaskExecutor};
        use taskloom_core::event::EventBus;
        use taskloom_types::task::{AgentContract, TaskInvocation, TaskSpec};

        let dir = tempdir().unwrap();
        let ctx = RunContext::new(Uuid::now_v7(), "restart", EventBus::new(16));
        let effect_id = ctx.new_effect_id("plan", "0:plan");
        let io = TaskContext {
            run_id: ctx.run_id(),
            step_id: "plan",
            effect_id: &effect_id,
        }
        .io();
        let invocation = TaskInvocation {
            effect_id: effect_id.clone(),
            step_id: "plan".to_string(),
            kind: "plan".to_string(),
            args: json!({"topic": "parsers"}),
            spec: TaskSpec {
                kind: "plan".to_string(),
                title: "Plan".to_string(),
                agent: AgentContract::new("planner", "Plan the work"),
                io,
                labels: vec![],
            },
        };

        let first_agent = ScriptedAgent::new();
        first_agent.respond_json(
            "plan",
            &json!({"summary": "three phases", "artifacts": [{"path": "plan.md", "format": "markdown"}]}),
        );
        let first = TaskExecutor::new(FsRecordStore::new(dir.path()), first_agent.clone())
            .execute(&invocation, &ctx)
            .await
            .unwrap();

        // A new process: fresh store and executor over the same directory.
        let second_agent = ScriptedAgent::new();
        second_agent.fail("plan", "must not be called");
        let restored = TaskExecutor::new(FsRecordStore::new(dir.path()), second_agent.clone())
            .execute(&invocation, &ctx)
            .await
            .unwrap();

        assert_eq!(restored, first);
        assert_eq!(restored.artifacts[0].path, "plan.md");
        assert_eq!(first_agent.calls("plan"), 1);
        assert_eq!(second_agent.calls("plan"), 0);
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        let run_id = Uuid::now_v7();
        store.write_record(&run_id, "doc.json", &json!(1)).await.unwrap();
        store.write_record(&run_id, "doc.json", &json!(2)).await.unwrap();

        assert_eq!(store.read_record(&run_id, "doc.json").await.unwrap(), Some(json!(2)));
        let entries: Vec<_> = std::fs::read_dir(store.run_dir(&run_id)).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_path_escapes_are_rejected() {
        let dir = tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        let run_id = Uuid::now_v7();

        for bad in ["../other/output.json", "/etc/passwd", "tasks/../../x.json", ""] {
            let err = store.write_record(&run_id, bad, &json!({})).await.unwrap_err();
            assert!(matches!(err, RepositoryError::Io(_)), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        let run_id = Uuid::now_v7();
        let path = store.run_dir(&run_id).join("bad.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        assert!(store.read_record(&run_id, "bad.json").await.is_err());
    }
}
