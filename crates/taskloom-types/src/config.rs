//! Engine configuration types.
//!
//! `EngineConfig` represents `{data_dir}/config.toml`. Every field has a
//! default so a missing or partial file still yields a usable engine.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::process::ParallelPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root of task records. Defaults to `{data_dir}/records`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_dir: Option<PathBuf>,

    /// Policy for parallel groups that do not declare one.
    #[serde(default)]
    pub parallel_policy: ParallelPolicy,

    /// How often a blocked breakpoint re-reads the durable store.
    #[serde(default = "default_breakpoint_poll_ms")]
    pub breakpoint_poll_ms: u64,

    /// Per-call agent timeout. No timeout when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,
}

fn default_breakpoint_poll_ms() -> u64 {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            records_dir: None,
            parallel_policy: ParallelPolicy::default(),
            breakpoint_poll_ms: default_breakpoint_poll_ms(),
            agent_timeout_secs: None,
            agent: None,
        }
    }
}

/// Which adapter carries agent requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentConfig {
    /// Spawn a program per request: request JSON on stdin, output on stdout.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    /// POST the request JSON; the response body is the output.
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.breakpoint_poll_ms, 1_000);
        assert_eq!(config.parallel_policy, ParallelPolicy::FailFast);
        assert!(config.agent.is_none());
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.breakpoint_poll_ms, 1_000);
        assert!(config.records_dir.is_none());
        assert!(config.agent_timeout_secs.is_none());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
parallel_policy = "wait_all"
breakpoint_poll_ms = 250
agent_timeout_secs = 600

[agent]
type = "command"
program = "my-agent"
args = ["--json"]
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.parallel_policy, ParallelPolicy::WaitAll);
        assert_eq!(config.breakpoint_poll_ms, 250);
        assert_eq!(config.agent_timeout_secs, Some(600));
        assert_eq!(
            config.agent,
            Some(AgentConfig::Command {
                program: "my-agent".to_string(),
                args: vec!["--json".to_string()],
                env: HashMap::new(),
            })
        );
    }

    #[test]
    fn test_http_agent_config() {
        let toml_str = r#"
[agent]
type = "http"
url = "http://localhost:8080/invoke"

[agent.headers]
authorization = "Bearer t"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        match config.agent {
            Some(AgentConfig::Http { url, headers }) => {
                assert_eq!(url, "http://localhost:8080/invoke");
                assert_eq!(headers["authorization"], "Bearer t");
            }
            other => panic!("expected http agent, got {other:?}"),
        }
    }
}
