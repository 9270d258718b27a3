//! `{{ path }}` bindings between step outputs and later step arguments.
//!
//! A string that is exactly one placeholder is replaced by the JSON value at
//! its path (objects stay objects). Any other string containing placeholders
//! is interpolated as text. Paths are dot-separated; numeric segments index
//! into arrays. Resolution is strict: a path that does not exist is an error.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("unresolved reference '{{{{ {0} }}}}'")]
    Unresolved(String),

    #[error("unterminated placeholder in '{0}'")]
    Unterminated(String),

    #[error("empty placeholder in '{0}'")]
    Empty(String),
}

/// Look up a dot-separated path inside `scope`.
pub fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(scope, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Resolve every placeholder in `value` (recursively) against `scope`.
pub fn resolve_value(value: &Value, scope: &Value) -> Result<Value, BindingError> {
    match value {
        Value::String(s) => resolve_string(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, scope)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, scope: &Value) -> Result<Value, BindingError> {
    if let Some(path) = sole_placeholder(s) {
        return lookup(scope, path)
            .cloned()
            .ok_or_else(|| BindingError::Unresolved(path.to_string()));
    }
    interpolate(s, scope).map(Value::String)
}

/// Replace every placeholder in `template` with the textual form of its value.
pub fn interpolate(template: &str, scope: &Value) -> Result<String, BindingError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| BindingError::Unterminated(template.to_string()))?;
        let path = after[..end].trim();
        if path.is_empty() {
            return Err(BindingError::Empty(template.to_string()));
        }
        let value = lookup(scope, path).ok_or_else(|| BindingError::Unresolved(path.to_string()))?;
        out.push_str(&value_to_string(value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Every placeholder path referenced anywhere inside `value`.
pub fn references(value: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    collect_references(value, &mut paths);
    paths
}

fn collect_references(value: &Value, paths: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let mut rest = s.as_str();
            while let Some(start) = rest.find("{{") {
                let after = &rest[start + 2..];
                let Some(end) = after.find("}}") else { break };
                let path = after[..end].trim();
                if !path.is_empty() {
                    paths.push(path.to_string());
                }
                rest = &after[end + 2..];
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_references(item, paths)),
        Value::Object(map) => map.values().for_each(|item| collect_references(item, paths)),
        _ => {}
    }
}

/// `Some(path)` when the whole string is a single `{{ path }}`.
fn sole_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    let path = inner.trim();
    (!path.is_empty()).then_some(path)
}

/// Convert a JSON value to a display string for interpolation.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Value {
        json!({
            "inputs": {"topic": "rust", "count": 3},
            "steps": {
                "research": {
                    "success": true,
                    "output": {"summary": "fast", "items": ["a", "b"]},
                },
            },
        })
    }

    #[test]
    fn test_sole_placeholder_keeps_json_type() {
        let resolved = resolve_value(&json!("{{ steps.research.output }}"), &scope()).unwrap();
        assert_eq!(resolved, json!({"summary": "fast", "items": ["a", "b"]}));

        let resolved = resolve_value(&json!("{{inputs.count}}"), &scope()).unwrap();
        assert_eq!(resolved, json!(3));
    }

    #[test]
    fn test_interpolation_in_text() {
        let resolved = resolve_value(
            &json!("Write about {{ inputs.topic }} ({{ steps.research.output.items.1 }})"),
            &scope(),
        )
        .unwrap();
        assert_eq!(resolved, json!("Write about rust (b)"));
    }

    #[test]
    fn test_nested_structures_are_resolved() {
        let args = json!({
            "plan": "{{ steps.research.output.summary }}",
            "list": ["{{ inputs.topic }}", 7, null],
            "ok": "{{ steps.research.success }}",
        });
        let resolved = resolve_value(&args, &scope()).unwrap();
        assert_eq!(
            resolved,
            json!({"plan": "fast", "list": ["rust", 7, null], "ok": true})
        );
    }

    #[test]
    fn test_missing_reference_is_an_error() {
        let err = resolve_value(&json!({"x": "{{ steps.build.output }}"}), &scope()).unwrap_err();
        assert_eq!(err, BindingError::Unresolved("steps.build.output".to_string()));

        let err = interpolate("hello {{ inputs.topic", &scope()).unwrap_err();
        assert!(matches!(err, BindingError::Unterminated(_)));
    }

    #[test]
    fn test_references_collects_all_paths() {
        let refs = references(&json!({
            "a": "{{ inputs.topic }} and {{ steps.research.output }}",
            "b": ["{{ steps.plan.output.x }}"],
            "c": 1,
        }));
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&"steps.plan.output.x".to_string()));
    }

    #[test]
    fn test_plain_strings_untouched() {
        assert_eq!(
            resolve_value(&json!("no placeholders"), &scope()).unwrap(),
            json!("no placeholders")
        );
    }
}
