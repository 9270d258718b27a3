//! Process definition parsing and validation.
//!
//! Converts YAML or JSON documents into `ProcessDefinition` and checks the
//! structural constraints the runner relies on: well-formed IDs, non-empty
//! parallel groups, and bindings that only look backwards.

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;
use taskloom_types::process::{ProcessDefinition, StepKind};
use thiserror::Error;

use super::binding;
use super::registry::TaskRegistry;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A binding points at a step that is not declared before it.
    #[error("step '{step}' references '{reference}', which is not available at that point")]
    UnknownReference { step: String, reference: String },

    /// Task kinds used by the definition but absent from the registry.
    #[error("unknown task kind(s): {}", .0.join(", "))]
    UnknownTaskKinds(Vec<String>),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML (or JSON, which is valid YAML) document and validate it.
pub fn parse_process_yaml(source: &str) -> Result<ProcessDefinition, DefinitionError> {
    let def: ProcessDefinition =
        serde_yaml_ng::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Load and validate a definition file.
pub fn load_process_file(path: &Path) -> Result<ProcessDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_process_yaml(&content).map_err(|e| match e {
        DefinitionError::Parse(msg) => DefinitionError::Parse(format!("{}: {msg}", path.display())),
        other => other,
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validate structural constraints on a `ProcessDefinition`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumerics, `-` and `_`
/// - At least one step exists
/// - Step and branch IDs are unique identifiers
/// - Parallel groups have at least one branch
/// - Bindings reference `inputs`, `run`, or steps declared earlier
pub fn validate_definition(def: &ProcessDefinition) -> Result<(), DefinitionError> {
    if !is_identifier(&def.name) {
        return Err(DefinitionError::Validation(format!(
            "process name '{}' is invalid (only alphanumerics, '-' and '_' allowed)",
            def.name
        )));
    }

    if def.steps.is_empty() {
        return Err(DefinitionError::Validation(
            "process must have at least one step".to_string(),
        ));
    }

    let mut all_ids = HashSet::new();
    for step in &def.steps {
        check_id(&step.id, &mut all_ids)?;
        if let StepKind::Parallel { branches, .. } = &step.kind {
            if branches.is_empty() {
                return Err(DefinitionError::Validation(format!(
                    "parallel step '{}' has no branches",
                    step.id
                )));
            }
            for branch in branches {
                check_id(&branch.id, &mut all_ids)?;
            }
        }
    }

    // Bindings may only look backwards.
    let mut declared: HashSet<&str> = HashSet::new();
    for step in &def.steps {
        match &step.kind {
            StepKind::Task { args, .. } => check_references(&step.id, args, &declared)?,
            StepKind::Parallel { branches, .. } => {
                for branch in branches {
                    check_references(&branch.id, &branch.args, &declared)?;
                }
                declared.extend(branches.iter().map(|b| b.id.as_str()));
            }
            StepKind::Breakpoint {
                title,
                question,
                summary,
                ..
            } => {
                check_references(&step.id, summary, &declared)?;
                check_references(&step.id, &Value::String(title.clone()), &declared)?;
                check_references(&step.id, &Value::String(question.clone()), &declared)?;
            }
        }
        declared.insert(step.id.as_str());
    }

    if let Some(output) = &def.output {
        check_references("output", output, &declared)?;
    }

    Ok(())
}

fn check_id<'a>(id: &'a str, seen: &mut HashSet<&'a str>) -> Result<(), DefinitionError> {
    if !is_identifier(id) {
        return Err(DefinitionError::Validation(format!(
            "step ID '{id}' is invalid (only alphanumerics, '-' and '_' allowed)"
        )));
    }
    if !seen.insert(id) {
        return Err(DefinitionError::Validation(format!("duplicate step ID: '{id}'")));
    }
    Ok(())
}

fn check_references(step: &str, value: &Value, declared: &HashSet<&str>) -> Result<(), DefinitionError> {
    for reference in binding::references(value) {
        let mut segments = reference.split('.');
        let valid = match segments.next() {
            Some("inputs") | Some("run") => true,
            Some("steps") => segments.next().is_some_and(|id| declared.contains(id)),
            _ => false,
        };
        if !valid {
            return Err(DefinitionError::UnknownReference {
                step: step.to_string(),
                reference,
            });
        }
    }
    Ok(())
}

/// Every task kind the definition uses, in first-use order.
pub fn task_kinds(def: &ProcessDefinition) -> Vec<&str> {
    let used = def.steps.iter().flat_map(|step| match &step.kind {
        StepKind::Task { kind, .. } => vec![kind.as_str()],
        StepKind::Parallel { branches, .. } => branches.iter().map(|b| b.kind.as_str()).collect(),
        StepKind::Breakpoint { .. } => Vec::new(),
    });
    let mut kinds: Vec<&str> = Vec::new();
    for kind in used {
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    kinds
}

/// Fail when the definition uses a task kind `registry` does not know.
pub fn validate_against_registry(
    def: &ProcessDefinition,
    registry: &TaskRegistry,
) -> Result<(), DefinitionError> {
    let missing: Vec<String> = task_kinds(def)
        .into_iter()
        .filter(|kind| !registry.contains(kind))
        .map(str::to_string)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DefinitionError::UnknownTaskKinds(missing))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
