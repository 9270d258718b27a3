//! Application state wiring the engine to its concrete stores.
//!
//! The engine is generic over its ports; `AppState` pins them to the infra
//! implementations: SQLite runs and breakpoints, filesystem task records and
//! the agent configured in `config.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use taskloom_core::engine::{
    BreakpointGate, BreakpointMode, ProcessRunner, RunnerOptions, TaskExecutor, TaskRegistry,
};
use taskloom_core::engine::checkpoint::CheckpointManager;
use taskloom_core::event::EventBus;
use taskloom_infra::agent::ConfiguredAgent;
use taskloom_infra::config::{agent_timeout, breakpoint_poll_interval, load_engine_config, resolve_records_dir};
use taskloom_infra::filesystem::records::FsRecordStore;
use taskloom_infra::filesystem::resolve_data_dir;
use taskloom_infra::sqlite::breakpoint::SqliteBreakpointStore;
use taskloom_infra::sqlite::pool::DatabasePool;
use taskloom_infra::sqlite::run::SqliteRunRepository;
use taskloom_types::config::EngineConfig;

/// The runner pinned to infra implementations.
pub type ConcreteRunner = ProcessRunner<SqliteRunRepository, SqliteBreakpointStore, FsRecordStore, ConfiguredAgent>;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub db_pool: DatabasePool,
    pub records: FsRecordStore,
    pub events: EventBus,
}

impl AppState {
    /// Resolve the data directory, load configuration and open the database.
    pub async fn init() -> Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;
        let db_pool = DatabasePool::open_in(&data_dir)
            .await
            .with_context(|| format!("Failed to open database in {}", data_dir.display()))?;
        let records = FsRecordStore::new(resolve_records_dir(&config, &data_dir));

        tracing::debug!(data_dir = %data_dir.display(), records = %records.root().display(), "state initialized");

        Ok(Self {
            data_dir,
            config,
            db_pool,
            records,
            events: EventBus::default(),
        })
    }

    pub fn runs(&self) -> SqliteRunRepository {
        SqliteRunRepository::new(self.db_pool.clone())
    }

    pub fn checkpoint(&self) -> CheckpointManager<SqliteRunRepository> {
        CheckpointManager::new(self.runs())
    }

    pub fn gate(&self) -> BreakpointGate<SqliteBreakpointStore> {
        BreakpointGate::new(SqliteBreakpointStore::new(self.db_pool.clone()), self.events.clone())
            .with_poll_interval(breakpoint_poll_interval(&self.config))
    }

    /// The agent from `[agent]` in `config.toml`.
    pub fn agent(&self) -> Result<ConfiguredAgent> {
        let Some(agent_config) = &self.config.agent else {
            bail!(
                "No agent configured. Add an [agent] section to {}",
                self.data_dir.join("config.toml").display()
            );
        };
        ConfiguredAgent::from_config(agent_config, agent_timeout(&self.config))
            .context("Invalid agent configuration")
    }

    pub fn runner(&self, registry: TaskRegistry, mode: BreakpointMode) -> Result<ConcreteRunner> {
        let executor = TaskExecutor::new(self.records.clone(), self.agent()?);
        let runner = ProcessRunner::new(
            Arc::new(registry),
            Arc::new(executor),
            Arc::new(self.gate()),
            self.runs(),
            self.events.clone(),
        )
        .with_options(RunnerOptions {
            breakpoint_mode: mode,
            default_parallel_policy: self.config.parallel_policy,
        });
        Ok(runner)
    }
}

/// Task templates for a process: `--tasks DIR`, else `tasks/` next to the
/// process file when it exists.
pub fn load_registry(process_file: &Path, tasks_dir: Option<&Path>) -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    let dir = match tasks_dir {
        Some(dir) => Some(dir.to_path_buf()),
        None => process_file
            .parent()
            .map(|parent| parent.join("tasks"))
            .filter(|dir| dir.is_dir()),
    };

    if let Some(dir) = dir {
        let kinds = registry
            .load_templates(&dir)
            .with_context(|| format!("Failed to load task templates from {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), count = kinds.len(), "loaded task templates");
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
kind: research
title: "Research {{ args.topic }}"
agent:
  role: analyst
  task: "Investigate {{ args.topic }}"
"#;

    #[test]
    fn test_registry_from_sibling_tasks_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tasks")).unwrap();
        std::fs::write(dir.path().join("tasks/research.yaml"), TEMPLATE).unwrap();
        let process = dir.path().join("process.yaml");

        let registry = load_registry(&process, None).unwrap();
        assert!(registry.contains("research"));
    }

    #[test]
    fn test_registry_without_tasks_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = load_registry(&dir.path().join("process.yaml"), None).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_explicit_tasks_dir_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(load_registry(&dir.path().join("p.yaml"), Some(&missing)).is_err());
    }
}
