//! Agent output handling: text repair, JSON parsing, schema validation and
//! artifact extraction.

pub mod repair;
pub mod schema;

use serde_json::Value;
use taskloom_types::artifact::Artifact;

/// Pull the `artifacts` field out of a validated payload.
///
/// A missing or `null` field means no artifacts; anything that is not a list
/// of `{path, format, label?}` objects is reported as a violation.
pub fn extract_artifacts(output: &Value) -> Result<Vec<Artifact>, String> {
    match output.get("artifacts") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| format!("/artifacts: expected a list of {{path, format, label?}}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_artifacts() {
        let output = json!({
            "summary": "done",
            "artifacts": [
                {"path": "src/main.rs", "format": "code"},
                {"path": "README.md", "format": "markdown", "label": "docs"},
            ]
        });
        let artifacts = extract_artifacts(&output).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[1].label.as_deref(), Some("docs"));

        assert!(extract_artifacts(&json!({"summary": "x"})).unwrap().is_empty());
        assert!(extract_artifacts(&json!(["not", "an", "object"])).unwrap().is_empty());
        assert!(extract_artifacts(&json!({"artifacts": "nope"})).is_err());
    }
}
