//! Per-run execution context shared by every component of a run.
//!
//! Holds the fixed run ID, a monotonic clock, deterministic effect-ID
//! generation, structured logging scoped to the run, the event bus, and the
//! run's cancellation token. Cloning is cheap; clones share everything.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use taskloom_types::event::EngineEvent;
use taskloom_types::task::EffectId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use uuid::Uuid;

use crate::event::EventBus;

#[derive(Clone)]
pub struct RunContext {
    inner: Arc<Inner>,
}

struct Inner {
    run_id: Uuid,
    process_name: String,
    started: Instant,
    span: tracing::Span,
    events: EventBus,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(run_id: Uuid, process_name: impl Into<String>, events: EventBus) -> Self {
        let process_name = process_name.into();
        let span = tracing::info_span!("run", run_id = %run_id, process = %process_name);
        Self {
            inner: Arc::new(Inner {
                run_id,
                process_name,
                started: Instant::now(),
                span,
                events,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    pub fn process_name(&self) -> &str {
        &self.inner.process_name
    }

    /// Monotonic time since the context was created. Never goes backwards.
    pub fn now(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Deterministic effect ID for the task at `sequence_hint` (the step
    /// position) of this run.
    pub fn new_effect_id(&self, kind: &str, sequence_hint: &str) -> EffectId {
        effect_id_for(&self.inner.run_id, kind, sequence_hint)
    }

    /// Emit a structured log line scoped to the run.
    ///
    /// `fields` is attached as a JSON string. Never fails.
    pub fn log(&self, level: Level, message: &str, fields: &Value) {
        let run_id = self.inner.run_id;
        let fields = if fields.is_null() {
            String::new()
        } else {
            fields.to_string()
        };
        self.inner.span.in_scope(|| match level {
            Level::ERROR => tracing::error!(%run_id, fields = %fields, "{message}"),
            Level::WARN => tracing::warn!(%run_id, fields = %fields, "{message}"),
            Level::INFO => tracing::info!(%run_id, fields = %fields, "{message}"),
            Level::DEBUG => tracing::debug!(%run_id, fields = %fields, "{message}"),
            _ => tracing::trace!(%run_id, fields = %fields, "{message}"),
        });
    }

    /// Tracing span covering the whole run.
    pub fn span(&self) -> &tracing::Span {
        &self.inner.span
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn publish(&self, event: EngineEvent) {
        self.inner.events.publish(event);
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.inner.run_id)
            .field("process_name", &self.inner.process_name)
            .finish()
    }
}

/// `<kind-slug>-<16 hex digits of sha256(run_id:kind:hint)>`.
pub fn effect_id_for(run_id: &Uuid, kind: &str, sequence_hint: &str) -> EffectId {
    let digest = Sha256::digest(format!("{run_id}:{kind}:{sequence_hint}").as_bytes());
    let hex = format!("{digest:x}");
    EffectId::new(format!("{}-{}", slug(kind), &hex[..16]))
}

/// Keep effect IDs filesystem-safe whatever the kind name.
fn slug(kind: &str) -> String {
    let slug: String = kind
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(40)
        .collect();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext::new(Uuid::now_v7(), "demo", EventBus::new(16))
    }

    #[test]
    fn test_effect_ids_are_deterministic() {
        let ctx = ctx();
        let a = ctx.new_effect_id("research", "0:research");
        let b = ctx.new_effect_id("research", "0:research");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("research-"));
        assert_eq!(a.as_str().len(), "research-".len() + 16);

        let same_run = RunContext::new(ctx.run_id(), "demo", EventBus::new(16));
        assert_eq!(same_run.new_effect_id("research", "0:research"), a);
    }

    #[test]
    fn test_effect_ids_differ_by_position_kind_and_run() {
        let ctx = ctx();
        let base = ctx.new_effect_id("implement", "1.0:backend");
        assert_ne!(base, ctx.new_effect_id("implement", "1.1:frontend"));
        assert_ne!(base, ctx.new_effect_id("review", "1.0:backend"));
        assert_ne!(base, self::ctx().new_effect_id("implement", "1.0:backend"));
    }

    #[test]
    fn test_slug_sanitizes_kind() {
        let id = effect_id_for(&Uuid::nil(), "Write Docs/v2", "0");
        assert!(id.as_str().starts_with("write-docs-v2-"));
        let id = effect_id_for(&Uuid::nil(), "", "0");
        assert!(id.as_str().starts_with("task-"));
    }

    #[tokio::test]
    async fn test_now_is_monotonic() {
        let ctx = ctx();
        let first = ctx.now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = ctx.now();
        assert!(second >= first);
    }

    #[test]
    fn test_log_never_panics() {
        let ctx = ctx();
        ctx.log(Level::INFO, "step started", &json!({"step_id": "a"}));
        ctx.log(Level::TRACE, "noise", &Value::Null);
    }

    #[test]
    fn test_clones_share_cancellation() {
        let ctx = ctx();
        let clone = ctx.clone();
        ctx.cancellation().cancel();
        assert!(clone.is_cancelled());
    }
}
