//! In-process agent driven by per-kind scripts, for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use taskloom_types::task::AgentRequest;

use super::{AgentError, AgentInvoker, RawOutput};

type Reply = Result<String, String>;

#[derive(Default)]
struct Script {
    queued: VecDeque<Reply>,
    fallback: Option<Reply>,
    delay: Duration,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, Script>,
    requests: Vec<AgentRequest>,
}

/// Replies are chosen by the request's task kind: queued replies first (in
/// order), then the sticky reply. Clones share scripts and the call log.
#[derive(Clone, Default)]
pub struct ScriptedAgent {
    state: Arc<Mutex<State>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script(&self, kind: &str, f: impl FnOnce(&mut Script)) -> &Self {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(state.scripts.entry(kind.to_string()).or_default());
        self
    }

    /// Always answer `kind` with `output` once queued replies run out.
    pub fn respond(&self, kind: &str, output: impl Into<String>) -> &Self {
        let output = output.into();
        self.with_script(kind, |s| s.fallback = Some(Ok(output)))
    }

    pub fn respond_json(&self, kind: &str, output: &serde_json::Value) -> &Self {
        self.respond(kind, output.to_string())
    }

    /// Always fail `kind` once queued replies run out.
    pub fn fail(&self, kind: &str, message: impl Into<String>) -> &Self {
        let message = message.into();
        self.with_script(kind, |s| s.fallback = Some(Err(message)))
    }

    /// Answer the next call for `kind` with `output`, ahead of the sticky reply.
    pub fn then_respond(&self, kind: &str, output: impl Into<String>) -> &Self {
        let output = output.into();
        self.with_script(kind, |s| s.queued.push_back(Ok(output)))
    }

    pub fn then_fail(&self, kind: &str, message: impl Into<String>) -> &Self {
        let message = message.into();
        self.with_script(kind, |s| s.queued.push_back(Err(message)))
    }

    /// Sleep this long before answering `kind`.
    pub fn delay(&self, kind: &str, delay: Duration) -> &Self {
        self.with_script(kind, |s| s.delay = delay)
    }

    /// Number of invocations seen for `kind`.
    pub fn calls(&self, kind: &str) -> usize {
        self.requests().iter().filter(|r| r.kind == kind).count()
    }

    pub fn total_calls(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .len()
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .clone()
    }
}

impl AgentInvoker for ScriptedAgent {
    async fn invoke(&self, request: &AgentRequest) -> Result<RawOutput, AgentError> {
        let (reply, delay) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.requests.push(request.clone());
            match state.scripts.get_mut(&request.kind) {
                Some(script) => {
                    let reply = script.queued.pop_front().or_else(|| script.fallback.clone());
                    (reply, script.delay)
                }
                None => (None, Duration::ZERO),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Ok(output)) => Ok(RawOutput::from(output)),
            Some(Err(message)) => Err(AgentError::Failed(message)),
            None => Err(AgentError::Unavailable(format!(
                "no script for task kind '{}'",
                request.kind
            ))),
        }
    }
}

impl std::fmt::Debug for ScriptedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedAgent")
            .field("calls", &self.total_calls())
            .finish()
    }
}
