//! Task kind registry.
//!
//! Maps a task-kind name to a pure builder `(args, TaskContext) -> TaskSpec`.
//! Builders are side-effect free: the runner (and `validate`) may call them
//! any number of times while planning. A registry is built once and then
//! shared read-only by every run.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use taskloom_types::task::{EffectId, TaskIo, TaskSpec};
use uuid::Uuid;

use super::error::TaskError;
use super::template::{TaskTemplate, TemplateError, load_template_dir};

/// What a builder knows about the task being planned.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub run_id: Uuid,
    pub step_id: &'a str,
    pub effect_id: &'a EffectId,
}

impl TaskContext<'_> {
    /// Standard record locations for this task.
    pub fn io(&self) -> TaskIo {
        TaskIo::for_effect(self.effect_id)
    }
}

/// Produces the `TaskSpec` for one task kind.
pub trait TaskBuilder: Send + Sync {
    fn build(&self, args: &Value, ctx: &TaskContext<'_>) -> Result<TaskSpec, TaskError>;
}

/// Adapter so plain functions and closures can be registered.
pub struct FnBuilder<F>(F);

impl<F> TaskBuilder for FnBuilder<F>
where
    F: Fn(&Value, &TaskContext<'_>) -> Result<TaskSpec, TaskError> + Send + Sync,
{
    fn build(&self, args: &Value, ctx: &TaskContext<'_>) -> Result<TaskSpec, TaskError> {
        (self.0)(args, ctx)
    }
}

#[derive(Default, Clone)]
pub struct TaskRegistry {
    builders: HashMap<String, Arc<dyn TaskBuilder>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `builder` for `kind`, replacing any previous registration.
    pub fn define(&mut self, kind: impl Into<String>, builder: impl TaskBuilder + 'static) -> &mut Self {
        let kind = kind.into();
        if self.builders.insert(kind.clone(), Arc::new(builder)).is_some() {
            tracing::warn!(kind = %kind, "task kind redefined");
        }
        self
    }

    /// Register a closure as the builder for `kind`.
    pub fn define_fn<F>(&mut self, kind: impl Into<String>, builder: F) -> &mut Self
    where
        F: Fn(&Value, &TaskContext<'_>) -> Result<TaskSpec, TaskError> + Send + Sync + 'static,
    {
        self.define(kind, FnBuilder(builder))
    }

    /// Register a declarative template under its own kind.
    pub fn define_template(&mut self, template: TaskTemplate) -> &mut Self {
        let kind = template.kind.clone();
        self.define(kind, template)
    }

    /// Build the `TaskSpec` for `kind` from its arguments.
    pub fn resolve(&self, kind: &str, args: &Value, ctx: &TaskContext<'_>) -> Result<TaskSpec, TaskError> {
        let builder = self
            .builders
            .get(kind)
            .ok_or_else(|| TaskError::UnknownTaskKind(kind.to_string()))?;
        builder.build(args, ctx)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Register every template found in `dir` (`*.yaml`, `*.yml`, `*.json`).
    ///
    /// Returns the kinds loaded, in file order.
    pub fn load_templates(&mut self, dir: &Path) -> Result<Vec<String>, TemplateError> {
        let templates: BTreeMap<_, _> = load_template_dir(dir)?.into_iter().collect();
        let mut kinds = Vec::with_capacity(templates.len());
        for (path, template) in templates {
            tracing::debug!(path = %path.display(), kind = %template.kind, "loaded task template");
            kinds.push(template.kind.clone());
            self.define_template(template);
        }
        Ok(kinds)
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
