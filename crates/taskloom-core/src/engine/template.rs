//! Declarative task templates.
//!
//! A template is a task-catalog file (YAML or JSON) describing one kind:
//!
//! ```yaml
//! kind: research
//! title: "Research {{ args.topic }}"
//! agent:
//!   role: Senior analyst
//!   task: "Investigate {{ args.topic }} and report findings"
//!   instructions:
//!     - "Focus on {{ args.focus }}"
//!   output_schema:
//!     type: object
//!     required: [summary]
//! labels: [research]
//! ```
//!
//! Placeholders see `args`, `run_id`, `step_id` and `effect_id`. When the
//! template declares no `context`, the resolved arguments are passed as the
//! agent context.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use taskloom_types::task::{AgentContract, TaskSpec};
use thiserror::Error;

use super::binding::{interpolate, resolve_value};
use super::error::TaskError;
use super::registry::{TaskBuilder, TaskContext};
use crate::output::schema;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate task kind '{kind}' in {path}")]
    DuplicateKind { kind: String, path: PathBuf },

    #[error("invalid output schema for '{kind}' in {path}: {message}")]
    InvalidSchema { kind: String, path: PathBuf, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub kind: String,
    pub title: String,
    pub agent: AgentContract,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl TaskBuilder for TaskTemplate {
    fn build(&self, args: &Value, ctx: &TaskContext<'_>) -> Result<TaskSpec, TaskError> {
        let scope = json!({
            "args": args,
            "run_id": ctx.run_id.to_string(),
            "step_id": ctx.step_id,
            "effect_id": ctx.effect_id.as_str(),
        });
        let invalid = |e: super::binding::BindingError| TaskError::InvalidArguments {
            kind: self.kind.clone(),
            message: e.to_string(),
        };

        let context = if self.agent.context.is_null() {
            args.clone()
        } else {
            resolve_value(&self.agent.context, &scope).map_err(invalid)?
        };
        let instructions = self
            .agent
            .instructions
            .iter()
            .map(|line| interpolate(line, &scope))
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;

        Ok(TaskSpec {
            kind: self.kind.clone(),
            title: interpolate(&self.title, &scope).map_err(invalid)?,
            agent: AgentContract {
                role: interpolate(&self.agent.role, &scope).map_err(invalid)?,
                task: interpolate(&self.agent.task, &scope).map_err(invalid)?,
                context,
                instructions,
                output_format: self.agent.output_format.clone(),
                output_schema: self.agent.output_schema.clone(),
            },
            io: ctx.io(),
            labels: self.labels.clone(),
        })
    }
}

/// Parse one template file. JSON is accepted as a YAML subset. The declared
/// output schema must compile.
pub fn load_template_file(path: &Path) -> Result<TaskTemplate, TemplateError> {
    let content = std::fs::read_to_string(path)?;
    let template: TaskTemplate = serde_yaml_ng::from_str(&content).map_err(|e| TemplateError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    schema::check_schema(&template.agent.output_schema).map_err(|message| TemplateError::InvalidSchema {
        kind: template.kind.clone(),
        path: path.to_path_buf(),
        message,
    })?;
    Ok(template)
}

/// Load every template in `dir` (non-recursive). Unrelated files are skipped;
/// a malformed template or a kind declared twice is an error.
pub fn load_template_dir(dir: &Path) -> Result<Vec<(PathBuf, TaskTemplate)>, TemplateError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"))
        })
        .collect();
    paths.sort();

    let mut templates: Vec<(PathBuf, TaskTemplate)> = Vec::with_capacity(paths.len());
    for path in paths {
        let template = load_template_file(&path)?;
        if templates.iter().any(|(_, t)| t.kind == template.kind) {
            return Err(TemplateError::DuplicateKind {
                kind: template.kind,
                path,
            });
        }
        templates.push((path, template));
    }
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloom_types::task::EffectId;
    use uuid::Uuid;

    const RESEARCH: &str = r#"
kind: research
title: "Research {{ args.topic }}"
agent:
  role: Senior analyst
  task: "Investigate {{ args.topic }}"
  instructions:
    - "Write to {{ effect_id }}"
  output_schema:
    type: object
    required: [summary]
labels: [research]
"#;

    fn build(template: &TaskTemplate, args: Value) -> Result<TaskSpec, TaskError> {
        let effect_id = EffectId::new("research-abc");
        let ctx = TaskContext {
            run_id: Uuid::nil(),
            step_id: "research",
            effect_id: &effect_id,
        };
        template.build(&args, &ctx)
    }

    #[test]
    fn test_template_interpolates_args() {
        let template: TaskTemplate = serde_yaml_ng::from_str(RESEARCH).unwrap();
        let spec = build(&template, json!({"topic": "parsers"})).unwrap();

        assert_eq!(spec.title, "Research parsers");
        assert_eq!(spec.agent.task, "Investigate parsers");
        assert_eq!(spec.agent.instructions, vec!["Write to research-abc"]);
        assert_eq!(spec.agent.context, json!({"topic": "parsers"}));
        assert_eq!(spec.agent.output_schema["required"], json!(["summary"]));
        assert_eq!(spec.io.input_path, "tasks/research-abc/input.json");
        assert_eq!(spec.labels, vec!["research"]);
    }

    #[test]
    fn test_missing_arg_is_invalid_arguments() {
        let template: TaskTemplate = serde_yaml_ng::from_str(RESEARCH).unwrap();
        let err = build(&template, json!({})).unwrap_err();
        assert!(matches!(err, TaskError::InvalidArguments { kind, .. } if kind == "research"));
    }

    #[test]
    fn test_explicit_context_is_resolved() {
        let mut template: TaskTemplate = serde_yaml_ng::from_str(RESEARCH).unwrap();
        template.agent.context = json!({"subject": "{{ args.topic }}", "fixed": 1});
        let spec = build(&template, json!({"topic": "lexers"})).unwrap();
        assert_eq!(spec.agent.context, json!({"subject": "lexers", "fixed": 1}));
    }

    #[test]
    fn test_uncompilable_schema_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(
            &path,
            "kind: plan\ntitle: Plan\nagent:\n  role: planner\n  task: Plan it\n  output_schema:\n    type: not-a-type\n",
        )
        .unwrap();

        let err = load_template_dir(dir.path()).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidSchema { ref kind, .. } if kind == "plan"), "{err}");
    }

    #[test]
    fn test_duplicate_kinds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), RESEARCH).unwrap();
        std::fs::write(dir.path().join("b.yml"), RESEARCH).unwrap();
        let err = load_template_dir(dir.path()).unwrap_err();
        assert!(matches!(err, TemplateError::DuplicateKind { .. }));
    }

    #[test]
    fn test_json_template_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{"kind": "plan", "title": "Plan", "agent": {"role": "architect", "task": "Plan it"}}"#,
        )
        .unwrap();
        let template = load_template_file(&path).unwrap();
        assert_eq!(template.kind, "plan");
        assert_eq!(template.agent.output_format, "JSON");
    }
}
