//! JSON Schema validation of agent output.
//!
//! Compiled validators are cached by schema text: a catalog reuses the same
//! handful of schemas across every run.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use jsonschema::Validator;
use serde_json::Value;

static VALIDATORS: LazyLock<DashMap<String, Arc<Validator>>> = LazyLock::new(DashMap::new);

/// Validate `value` against `schema`.
///
/// A `null` or empty-object schema accepts anything. On failure every
/// violated constraint is listed as `"<instance path>: <message>"`.
pub fn validate(value: &Value, schema: &Value) -> Result<(), Vec<String>> {
    if accepts_anything(schema) {
        return Ok(());
    }
    let validator = compiled(schema).map_err(|e| vec![e])?;
    let violations: Vec<String> = validator
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path.to_string();
            let path = if path.is_empty() { "/".to_string() } else { path };
            format!("{path}: {e}")
        })
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Check that `schema` compiles. Template loading and the executor call
/// this before any agent sees the schema.
pub fn check_schema(schema: &Value) -> Result<(), String> {
    if accepts_anything(schema) {
        return Ok(());
    }
    compiled(schema).map(|_| ())
}

fn accepts_anything(schema: &Value) -> bool {
    match schema {
        Value::Null | Value::Bool(true) => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn compiled(schema: &Value) -> Result<Arc<Validator>, String> {
    let key = schema.to_string();
    if let Some(validator) = VALIDATORS.get(&key) {
        return Ok(Arc::clone(&validator));
    }
    let validator = Arc::new(
        Validator::new(schema).map_err(|e| format!("invalid output schema: {e}"))?,
    );
    VALIDATORS.insert(key, Arc::clone(&validator));
    Ok(validator)
}
