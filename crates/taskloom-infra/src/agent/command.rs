//! Subprocess agent: one process per request.
//!
//! The request JSON (camelCase) is fed to stdin while stdout and stderr are
//! collected, and stdin is closed once written. A zero exit hands stdout back
//! as raw output; anything else is a failure carrying the tail of stderr.

use std::collections::HashMap;
use std::process::Stdio;

use taskloom_core::agent::{AgentError, RawOutput};
use taskloom_types::task::AgentRequest;
use tokio::io::AsyncWriteExt;

/// How much of stderr is kept in failure messages.
const STDERR_TAIL_BYTES: usize = 2_048;

#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl CommandAgent {
    pub fn new(program: impl Into<String>, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            program: program.into(),
            args,
            env,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn invoke(&self, request: &AgentRequest) -> Result<RawOutput, AgentError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| AgentError::Failed(format!("failed to encode request: {e}")))?;

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .env("TASKLOOM_EFFECT_ID", request.effect_id.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Unavailable(format!("failed to spawn '{}': {e}", self.program)))?;

        // A child may write output before it has read all of its input, so
        // stdin is fed while the output pipes drain.
        let program = &self.program;
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A program that ignores its input may exit before reading it.
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::debug!(program = %program, error = %e, "agent closed stdin early");
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output =
            output.map_err(|e| AgentError::Failed(format!("failed to wait for '{}': {e}", self.program)))?;

        if !output.status.success() {
            return Err(AgentError::Failed(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        Ok(RawOutput(output.stdout))
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::sample_request;

    fn sh(script: &str) -> CommandAgent {
        CommandAgent::new("sh", vec!["-c".to_string(), script.to_string()], HashMap::new())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_request_is_piped_to_stdin() {
        let raw = sh("cat").invoke(&sample_request("draft")).await.unwrap();
        let echoed: serde_json::Value = serde_json::from_slice(raw.as_bytes()).unwrap();
        assert_eq!(echoed["effectId"], "draft-0123456789abcdef");
        assert_eq!(echoed["outputFormat"], "JSON");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_is_passed() {
        let mut env = HashMap::new();
        env.insert("GREETING".to_string(), "hello".to_string());
        let agent = CommandAgent::new(
            "sh",
            vec!["-c".to_string(), r#"printf '{"g":"%s","e":"%s"}' "$GREETING" "$TASKLOOM_EFFECT_ID""#.to_string()],
            env,
        );
        let raw = agent.invoke(&sample_request("greet")).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(raw.as_bytes()).unwrap();
        assert_eq!(value["g"], "hello");
        assert_eq!(value["e"], "greet-0123456789abcdef");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let err = sh("echo 'model overloaded' >&2; exit 3")
            .invoke(&sample_request("draft"))
            .await
            .unwrap_err();
        match err {
            AgentError::Failed(msg) => assert!(msg.contains("model overloaded"), "{msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_request_streams_through_without_stalling() {
        let mut request = sample_request("bulk");
        request.context = serde_json::json!({"blob": "x".repeat(1_500_000)});

        let raw = tokio::time::timeout(std::time::Duration::from_secs(20), sh("cat").invoke(&request))
            .await
            .expect("agent stalled on a large request")
            .unwrap();
        let echoed: serde_json::Value = serde_json::from_slice(raw.as_bytes()).unwrap();
        assert_eq!(echoed["context"]["blob"].as_str().map(str::len), Some(1_500_000));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let agent = CommandAgent::new("/nonexistent/taskloom-agent", vec![], HashMap::new());
        let err = agent.invoke(&sample_request("draft")).await.unwrap_err();
        assert!(matches!(err, AgentError::Unavailable(_)));
    }

    #[test]
    fn test_stderr_tail_keeps_the_end() {
        let long = format!("{}END", "x".repeat(STDERR_TAIL_BYTES * 2));
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.len(), STDERR_TAIL_BYTES);
        assert!(tail.ends_with("END"));
    }
}
