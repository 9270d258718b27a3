//! The agent port.
//!
//! Executing a task means handing an `AgentRequest` to an opaque external
//! worker and getting raw output back. The engine never looks inside the
//! agent; implementations live in taskloom-infra (subprocess, HTTP) and in
//! `scripted` for tests (enabled for other crates by the `test-util` feature).

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

use std::future::Future;
use std::time::Duration;

use taskloom_types::task::AgentRequest;

/// Raw bytes returned by an agent, before repair and parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput(pub Vec<u8>);

impl RawOutput {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for RawOutput {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<String> for RawOutput {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

impl From<&str> for RawOutput {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// The agent could not be reached or started.
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    /// The agent ran but reported failure.
    #[error("agent call failed: {0}")]
    Failed(String),

    #[error("agent call timed out after {0:?}")]
    TimedOut(Duration),
}

/// One injected capability: `invoke(request) -> raw output | error`.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait AgentInvoker: Send + Sync {
    fn invoke(
        &self,
        request: &AgentRequest,
    ) -> impl Future<Output = Result<RawOutput, AgentError>> + Send;
}

/// Wraps an agent with a per-call deadline. Expiry surfaces as
/// `AgentError::TimedOut`; the inner call is dropped.
#[derive(Debug, Clone)]
pub struct TimeoutAgent<A> {
    inner: A,
    timeout: Duration,
}

impl<A: AgentInvoker> TimeoutAgent<A> {
    pub fn new(inner: A, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: AgentInvoker> AgentInvoker for TimeoutAgent<A> {
    async fn invoke(&self, request: &AgentRequest) -> Result<RawOutput, AgentError> {
        tokio::time::timeout(self.timeout, self.inner.invoke(request))
            .await
            .map_err(|_| AgentError::TimedOut(self.timeout))?
    }
}
