//! Breakpoint gate: durable human decisions.
//!
//! `raise` persists a pending breakpoint and waits until it is resolved.
//! Resolutions arrive two ways: in-process through `resolve` (delivered over
//! a watch channel) or from another process writing the durable store, which
//! a waiting `raise` notices by polling. There is no automatic timeout.

use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use taskloom_types::breakpoint::{Breakpoint, BreakpointContext, BreakpointRequest, Decision, Resolution};
use taskloom_types::error::RepositoryError;
use taskloom_types::event::EngineEvent;
use tokio::sync::watch;
use uuid::Uuid;

use super::context::RunContext;
use crate::event::EventBus;
use crate::repository::BreakpointStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BreakpointError {
    #[error("breakpoint not found: {0}")]
    NotFound(String),

    #[error("breakpoint {0} is already resolved")]
    AlreadyResolved(String),

    /// The durable store failed; a run cannot safely wait on it.
    #[error("breakpoint channel unavailable: {0}")]
    ChannelUnavailable(String),
}

/// Deterministic breakpoint ID for `step_id` of `run_id`.
pub fn breakpoint_id(run_id: &Uuid, step_id: &str) -> String {
    let digest = Sha256::digest(format!("{run_id}:breakpoint:{step_id}").as_bytes());
    let hex = format!("{digest:x}");
    format!("bp-{}", &hex[..16])
}

pub struct BreakpointGate<B: BreakpointStore> {
    store: B,
    events: EventBus,
    waiters: DashMap<String, watch::Sender<Option<Resolution>>>,
    poll_interval: Duration,
}

impl<B: BreakpointStore> BreakpointGate<B> {
    pub fn new(store: B, events: EventBus) -> Self {
        Self {
            store,
            events,
            waiters: DashMap::new(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// How often a waiting `raise` re-reads the store.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Breakpoints with a `wait` currently in progress in this process.
    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    /// Persist the breakpoint for `step_id` (or find the existing one).
    ///
    /// Returns the stored breakpoint, which is already resolved when a
    /// previous attempt of this run was answered.
    pub async fn open(
        &self,
        step_id: &str,
        title: &str,
        question: &str,
        context: BreakpointContext,
        ctx: &RunContext,
    ) -> Result<Breakpoint, BreakpointError> {
        let run_id = ctx.run_id();
        let id = breakpoint_id(&run_id, step_id);
        let candidate = Breakpoint::pending(
            id.clone(),
            step_id,
            BreakpointRequest {
                question: question.to_string(),
                title: title.to_string(),
                context,
            },
        );
        let stored = self
            .store
            .save_breakpoint(&candidate)
            .await
            .map_err(|e| BreakpointError::ChannelUnavailable(e.to_string()))?;

        if stored.state.is_resolved() {
            tracing::debug!(run_id = %run_id, breakpoint_id = %id, "breakpoint already resolved");
        } else {
            tracing::info!(
                run_id = %run_id,
                step_id,
                breakpoint_id = %id,
                title,
                "breakpoint raised; awaiting decision"
            );
            ctx.publish(EngineEvent::BreakpointRaised {
                run_id,
                breakpoint_id: id,
                title: title.to_string(),
            });
        }
        Ok(stored)
    }

    /// Record the breakpoint and block until it is resolved.
    pub async fn raise(
        &self,
        step_id: &str,
        title: &str,
        question: &str,
        context: BreakpointContext,
        ctx: &RunContext,
    ) -> Result<Resolution, BreakpointError> {
        let breakpoint = self.open(step_id, title, question, context, ctx).await?;
        if let Some(resolution) = breakpoint.resolution {
            return Ok(resolution);
        }
        self.wait(&breakpoint.id).await
    }

    /// Block until breakpoint `id` is resolved.
    pub async fn wait(&self, id: &str) -> Result<Resolution, BreakpointError> {
        let mut rx = self
            .waiters
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        // Declared after `rx` so it runs while `rx` still counts as a receiver.
        let _guard = WaiterGuard {
            waiters: &self.waiters,
            id,
        };

        loop {
            let delivered = rx.borrow_and_update().clone();
            if let Some(resolution) = delivered {
                return Ok(resolution);
            }

            let stored = self
                .store
                .get_breakpoint(id)
                .await
                .map_err(|e| BreakpointError::ChannelUnavailable(e.to_string()))?
                .ok_or_else(|| BreakpointError::NotFound(id.to_string()))?;
            if let Some(resolution) = stored.resolution {
                return Ok(resolution);
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Deliver a decision. Unknown IDs fail with `NotFound` and wake nobody.
    pub async fn resolve(
        &self,
        id: &str,
        decision: Decision,
        payload: Option<serde_json::Value>,
    ) -> Result<Breakpoint, BreakpointError> {
        let resolution = Resolution { decision, payload };
        let resolved = self
            .store
            .resolve_breakpoint(id, &resolution)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => BreakpointError::NotFound(id.to_string()),
                RepositoryError::Conflict(_) => BreakpointError::AlreadyResolved(id.to_string()),
                other => BreakpointError::ChannelUnavailable(other.to_string()),
            })?;

        // Receivers keep the last value after the sender is dropped.
        if let Some((_, sender)) = self.waiters.remove(id) {
            sender.send_replace(Some(resolution));
        }

        tracing::info!(
            run_id = %resolved.run_id,
            breakpoint_id = id,
            decision = %decision,
            "breakpoint resolved"
        );
        self.events.publish(EngineEvent::BreakpointResolved {
            run_id: resolved.run_id,
            breakpoint_id: id.to_string(),
            decision: decision.to_string(),
        });
        Ok(resolved)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Breakpoint>, BreakpointError> {
        self.store
            .get_breakpoint(id)
            .await
            .map_err(|e| BreakpointError::ChannelUnavailable(e.to_string()))
    }

    /// Pending breakpoints, optionally for one run.
    pub async fn pending(&self, run_id: Option<&Uuid>) -> Result<Vec<Breakpoint>, BreakpointError> {
        self.store
            .list_breakpoints(run_id, true)
            .await
            .map_err(|e| BreakpointError::ChannelUnavailable(e.to_string()))
    }
}

/// Drops the waiter entry for `id` when the last local wait on it ends,
/// however it ends: resolved in-process, resolved through the store, failed,
/// or cancelled by dropping the future.
struct WaiterGuard<'a> {
    waiters: &'a DashMap<String, watch::Sender<Option<Resolution>>>,
    id: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.waiters
            .remove_if(self.id, |_, sender| sender.receiver_count() <= 1);
    }
}
