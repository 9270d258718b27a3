//! Agent adapters selected by `[agent]` in `config.toml`.
//!
//! - `command`: spawn a program per request (see [`command::CommandAgent`])
//! - `http`: POST the request to an endpoint (see [`http::HttpAgent`])

pub mod command;
pub mod http;

use std::time::Duration;

use taskloom_core::agent::{AgentError, AgentInvoker, RawOutput};
use taskloom_types::config::AgentConfig;
use taskloom_types::task::AgentRequest;

use self::command::CommandAgent;
use self::http::HttpAgent;

#[derive(Debug, Clone)]
enum Backend {
    Command(CommandAgent),
    Http(HttpAgent),
}

/// The agent described by configuration, with the optional per-call deadline.
#[derive(Debug, Clone)]
pub struct ConfiguredAgent {
    backend: Backend,
    timeout: Option<Duration>,
}

impl ConfiguredAgent {
    pub fn from_config(config: &AgentConfig, timeout: Option<Duration>) -> Result<Self, AgentError> {
        let backend = match config {
            AgentConfig::Command { program, args, env } => {
                Backend::Command(CommandAgent::new(program, args.clone(), env.clone()))
            }
            AgentConfig::Http { url, headers } => Backend::Http(HttpAgent::new(url, headers.clone())?),
        };
        Ok(Self { backend, timeout })
    }

    pub fn describe(&self) -> String {
        match &self.backend {
            Backend::Command(agent) => format!("command: {}", agent.program()),
            Backend::Http(agent) => format!("http: {}", agent.url()),
        }
    }

    async fn dispatch(&self, request: &AgentRequest) -> Result<RawOutput, AgentError> {
        match &self.backend {
            Backend::Command(agent) => agent.invoke(request).await,
            Backend::Http(agent) => agent.invoke(request).await,
        }
    }
}

impl AgentInvoker for ConfiguredAgent {
    async fn invoke(&self, request: &AgentRequest) -> Result<RawOutput, AgentError> {
        tracing::debug!(effect_id = %request.effect_id, kind = %request.kind, agent = %self.describe(), "invoking agent");
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.dispatch(request))
                .await
                .map_err(|_| AgentError::TimedOut(limit))?,
            None => self.dispatch(request).await,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_request(kind: &str) -> AgentRequest {
    use taskloom_types::task::EffectId;

    AgentRequest {
        effect_id: EffectId::new(format!("{kind}-0123456789abcdef")),
        kind: kind.to_string(),
        role: "writer".to_string(),
        task: "Draft the summary".to_string(),
        context: serde_json::json!({"topic": "rust"}),
        instructions: vec!["Be brief".to_string()],
        output_format: "JSON".to_string(),
        output_schema: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_config_command() {
        let agent = ConfiguredAgent::from_config(
            &AgentConfig::Command {
                program: "my-agent".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
            None,
        )
        .unwrap();
        assert_eq!(agent.describe(), "command: my-agent");
    }

    #[test]
    fn test_from_config_http() {
        let agent = ConfiguredAgent::from_config(
            &AgentConfig::Http {
                url: "http://localhost:9/invoke".to_string(),
                headers: HashMap::new(),
            },
            Some(Duration::from_secs(5)),
        )
        .unwrap();
        assert_eq!(agent.describe(), "http: http://localhost:9/invoke");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_applies_to_backend() {
        let agent = ConfiguredAgent::from_config(
            &AgentConfig::Command {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "sleep 5".to_string()],
                env: HashMap::new(),
            },
            Some(Duration::from_millis(100)),
        )
        .unwrap();
        let err = agent.invoke(&sample_request("slow")).await.unwrap_err();
        assert!(matches!(err, AgentError::TimedOut(_)));
    }
}
