//! Process runner: interprets a definition's steps in order.
//!
//! # Execution flow
//!
//! 1. Validate the definition against the registry and create the run record.
//! 2. For each step: check cancellation, checkpoint the step start, resolve
//!    bindings against the scope, run it, checkpoint the result.
//! 3. Task steps go through the `TaskExecutor`; parallel steps fan out through
//!    the `ParallelCoordinator`; breakpoint steps go through the gate.
//! 4. Every step result lands in the scope as `steps.<id>` so later steps can
//!    bind to it. Artifacts accumulate in step order.
//! 5. The run ends completed, suspended at a breakpoint, or failed with every
//!    artifact produced so far.
//!
//! Resuming replays the definition from the top under the same run ID: tasks
//! whose output record exists return it without invoking the agent, and
//! resolved breakpoints return their stored decision.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value, json};
use taskloom_types::artifact::Artifact;
use taskloom_types::breakpoint::{BreakpointContext, Decision};
use taskloom_types::event::EngineEvent;
use taskloom_types::process::{
    FailurePolicy, ParallelBranch, ParallelPolicy, ProcessDefinition, RejectPolicy, StepDescriptor, StepKind,
};
use taskloom_types::run::{Run, RunStatus};
use taskloom_types::task::{TaskInvocation, TaskResult};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::binding::{self, BindingError};
use super::breakpoint::{BreakpointError, BreakpointGate, breakpoint_id};
use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::RunContext;
use super::definition::{validate_against_registry, validate_definition};
use super::error::TaskError;
use super::executor::TaskExecutor;
use super::parallel::{ParallelCoordinator, ParallelFailure};
use super::registry::{TaskContext, TaskRegistry};
use crate::agent::AgentInvoker;
use crate::event::EventBus;
use crate::repository::{BreakpointStore, RecordStore, RunRepository};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// What a run does when it reaches an unresolved breakpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BreakpointMode {
    /// Wait in-process until the breakpoint is resolved.
    #[default]
    Block,
    /// Persist the breakpoint, mark the run suspended and return.
    Suspend,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerOptions {
    pub breakpoint_mode: BreakpointMode,
    /// Used by parallel steps that do not declare a policy.
    pub default_parallel_policy: ParallelPolicy,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: Uuid,
    pub output: Value,
    /// Every artifact, in step order (branches in input order).
    pub artifacts: Vec<Artifact>,
    pub completed_steps: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SuspendedRun {
    pub run_id: Uuid,
    pub step_id: String,
    pub breakpoint_id: String,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunResult),
    /// Parked at a breakpoint; resolve it and call `resume`.
    Suspended(SuspendedRun),
}

impl RunOutcome {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Completed(result) => result.run_id,
            Self::Suspended(suspended) => suspended.run_id,
        }
    }

    pub fn artifacts(&self) -> &[Artifact] {
        match self {
            Self::Completed(result) => &result.artifacts,
            Self::Suspended(suspended) => &suspended.artifacts,
        }
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Why a step (and therefore possibly the run) failed.
#[derive(Debug, thiserror::Error)]
pub enum StepFailure {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("parallel group failed: {0}")]
    Parallel(ParallelFailure<TaskResult, TaskError>),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Breakpoint(#[from] BreakpointError),

    #[error("breakpoint {breakpoint_id} was rejected")]
    BreakpointRejected { breakpoint_id: String },

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("invalid process definition: {0}")]
    Definition(String),
}

impl StepFailure {
    /// Stable error-kind label for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Task(e) => e.kind(),
            Self::Parallel(_) => "parallel_failure",
            Self::Binding(_) => "binding",
            Self::Breakpoint(BreakpointError::NotFound(_)) => "breakpoint_not_found",
            Self::Breakpoint(BreakpointError::AlreadyResolved(_)) => "already_resolved",
            Self::Breakpoint(BreakpointError::ChannelUnavailable(_)) => "channel_unavailable",
            Self::BreakpointRejected { .. } => "breakpoint_rejected",
            Self::Cancelled => "cancelled",
            Self::Checkpoint(_) => "checkpoint",
            Self::Definition(_) => "definition",
        }
    }

    /// Failures `on_failure: continue` may absorb.
    fn is_catchable(&self) -> bool {
        matches!(self, Self::Task(_) | Self::Parallel(_) | Self::Binding(_))
    }

    /// Task results the failing step produced before it failed.
    pub fn completed_results(&self) -> Vec<&TaskResult> {
        match self {
            Self::Parallel(failure) => failure.completed_results().collect(),
            _ => Vec::new(),
        }
    }
}

/// A run ended without completing.
#[derive(Debug)]
pub struct RunFailure {
    pub run_id: Uuid,
    /// `None` when the run never reached a step.
    pub failed_step: Option<String>,
    pub cause: StepFailure,
    /// Every artifact produced before the failure, in step order.
    pub partial_artifacts: Vec<Artifact>,
}

impl RunFailure {
    pub fn kind(&self) -> &'static str {
        self.cause.kind()
    }

    fn before_start(run_id: Uuid, cause: StepFailure) -> Self {
        Self {
            run_id,
            failed_step: None,
            cause,
            partial_artifacts: Vec::new(),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failed_step {
            Some(step) => write!(f, "run {} failed at step '{step}': {}", self.run_id, self.cause),
            None => write!(f, "run {} failed: {}", self.run_id, self.cause),
        }
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Where and why `drive_steps` stopped.
struct Halt {
    step: Option<String>,
    cause: StepFailure,
}

fn halt_at<E: Into<StepFailure>>(step: &str) -> impl FnOnce(E) -> Halt + '_ {
    move |e| Halt {
        step: Some(step.to_string()),
        cause: e.into(),
    }
}

/// A finished step: its scope record, its artifacts, and records for any
/// parallel branches it ran.
struct StepDone {
    record: Value,
    artifacts: Vec<Artifact>,
    branches: Vec<(String, Value)>,
}

enum StepOutcome {
    Done(StepDone),
    Waiting { breakpoint_id: String },
}

// ---------------------------------------------------------------------------
// ProcessRunner
// ---------------------------------------------------------------------------

/// Generic over its stores and agent so tests run fully in memory.
pub struct ProcessRunner<R, B, S, A>
where
    R: RunRepository,
    B: BreakpointStore,
    S: RecordStore,
    A: AgentInvoker,
{
    registry: Arc<TaskRegistry>,
    executor: Arc<TaskExecutor<S, A>>,
    gate: Arc<BreakpointGate<B>>,
    checkpoint: CheckpointManager<R>,
    events: EventBus,
    options: RunnerOptions,
    /// Cancellation tokens keyed by run_id.
    active: DashMap<Uuid, CancellationToken>,
}

impl<R, B, S, A> ProcessRunner<R, B, S, A>
where
    R: RunRepository,
    B: BreakpointStore,
    S: RecordStore + 'static,
    A: AgentInvoker + 'static,
{
    pub fn new(
        registry: Arc<TaskRegistry>,
        executor: Arc<TaskExecutor<S, A>>,
        gate: Arc<BreakpointGate<B>>,
        runs: R,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            executor,
            gate,
            checkpoint: CheckpointManager::new(runs),
            events,
            options: RunnerOptions::default(),
            active: DashMap::new(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &BreakpointGate<B> {
        &self.gate
    }

    pub fn checkpoint(&self) -> &CheckpointManager<R> {
        &self.checkpoint
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start a fresh run of `def` under a new run ID.
    pub async fn run(&self, def: &ProcessDefinition, inputs: Value) -> Result<RunOutcome, RunFailure> {
        let ctx = RunContext::new(Uuid::now_v7(), def.name.clone(), self.events.clone());
        self.execute(def, inputs, &ctx).await
    }

    /// Start a fresh run of `def` under `ctx`.
    pub async fn execute(
        &self,
        def: &ProcessDefinition,
        inputs: Value,
        ctx: &RunContext,
    ) -> Result<RunOutcome, RunFailure> {
        let run_id = ctx.run_id();
        self.check_definition(def)
            .map_err(|cause| RunFailure::before_start(run_id, cause))?;

        let run = Run::new(run_id, def.name.clone(), def.version.clone(), inputs);
        self.checkpoint
            .checkpoint_run_created(&run)
            .await
            .map_err(|e| RunFailure::before_start(run_id, e.into()))?;

        self.drive(def, run, ctx, false).await
    }

    /// Continue a suspended or interrupted run.
    pub async fn resume(&self, run_id: Uuid, def: &ProcessDefinition) -> Result<RunOutcome, RunFailure> {
        let fail = |cause: StepFailure| RunFailure::before_start(run_id, cause);

        let mut run = self.checkpoint.load_run(run_id).await.map_err(|e| fail(e.into()))?;
        if run.status.is_terminal() {
            return Err(fail(
                CheckpointError::NotResumable {
                    run_id,
                    status: run.status.as_str(),
                }
                .into(),
            ));
        }
        if run.process_name != def.name {
            return Err(fail(
                CheckpointError::DefinitionMismatch {
                    expected: run.process_name.clone(),
                    actual: def.name.clone(),
                }
                .into(),
            ));
        }
        self.check_definition(def).map_err(fail)?;

        // Artifacts and results are rebuilt by the replay.
        run.artifacts.clear();
        run.result = None;
        run.failed_step = None;
        run.error = None;
        run.completed_at = None;

        let ctx = RunContext::new(run_id, def.name.clone(), self.events.clone());
        self.drive(def, run, &ctx, true).await
    }

    /// Stop scheduling further steps of `run_id`. In-flight work finishes.
    ///
    /// Also cancels runs that are not active in this process (suspended, or
    /// driven by another process that observes the persisted status).
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), CheckpointError> {
        self.checkpoint.request_cancel(run_id).await?;
        if let Some((_, token)) = self.active.remove(&run_id) {
            token.cancel();
        }
        Ok(())
    }

    fn check_definition(&self, def: &ProcessDefinition) -> Result<(), StepFailure> {
        validate_definition(def)
            .and_then(|()| validate_against_registry(def, &self.registry))
            .map_err(|e| StepFailure::Definition(e.to_string()))
    }

    async fn drive(
        &self,
        def: &ProcessDefinition,
        mut run: Run,
        ctx: &RunContext,
        resumed: bool,
    ) -> Result<RunOutcome, RunFailure> {
        let run_id = ctx.run_id();
        self.active.insert(run_id, ctx.cancellation().clone());

        let span = ctx.span().clone();
        let driven = self.drive_steps(def, &mut run, ctx, resumed).instrument(span).await;
        let result = match driven {
            Ok(outcome) => Ok(outcome),
            Err(halt) => Err(self.finish_failed(def, &mut run, ctx, halt).await),
        };

        self.active.remove(&run_id);
        result
    }

    async fn drive_steps(
        &self,
        def: &ProcessDefinition,
        run: &mut Run,
        ctx: &RunContext,
        resumed: bool,
    ) -> Result<RunOutcome, Halt> {
        let run_id = ctx.run_id();
        let started = ctx.now();

        run.status = RunStatus::Running;
        self.checkpoint.checkpoint_run(run).await.map_err(|e| Halt {
            step: None,
            cause: e.into(),
        })?;

        ctx.publish(EngineEvent::RunStarted {
            run_id,
            process_name: def.name.clone(),
            resumed,
        });
        tracing::info!(
            run_id = %run_id,
            process = %def.name,
            steps = def.steps.len(),
            resumed,
            "starting run"
        );

        let mut scope = json!({
            "inputs": run.inputs.clone(),
            "run": { "id": run_id.to_string(), "process": def.name },
            "steps": {},
        });
        let mut completed = Vec::new();

        for (index, step) in def.steps.iter().enumerate() {
            if self.cancel_requested(ctx).await {
                return Err(Halt {
                    step: Some(step.id.clone()),
                    cause: StepFailure::Cancelled,
                });
            }

            let step_started = ctx.now();
            let log_id = self
                .checkpoint
                .checkpoint_step_start(run_id, &step.id, step.step_type())
                .await
                .map_err(halt_at(&step.id))?;
            ctx.publish(EngineEvent::StepStarted {
                run_id,
                step_id: step.id.clone(),
                step_type: step.step_type().to_string(),
            });
            tracing::debug!(run_id = %run_id, step_id = %step.id, step_type = step.step_type(), "step started");

            match self.run_step(index, step, &scope, ctx).await {
                Ok(StepOutcome::Done(done)) => {
                    self.checkpoint
                        .checkpoint_step_complete(log_id, Some(&done.record))
                        .await
                        .map_err(halt_at(&step.id))?;
                    absorb(&mut scope, run, &step.id, done);
                    completed.push(step.id.clone());

                    ctx.publish(EngineEvent::StepCompleted {
                        run_id,
                        step_id: step.id.clone(),
                        duration_ms: millis(ctx.now().saturating_sub(step_started)),
                    });
                }
                Ok(StepOutcome::Waiting { breakpoint_id }) => {
                    self.checkpoint
                        .checkpoint_step_waiting(log_id)
                        .await
                        .map_err(halt_at(&step.id))?;
                    run.status = RunStatus::Suspended;
                    run.context = steps_context(&scope);
                    self.checkpoint.checkpoint_run(run).await.map_err(halt_at(&step.id))?;

                    tracing::info!(
                        run_id = %run_id,
                        step_id = %step.id,
                        breakpoint_id = %breakpoint_id,
                        "run suspended at breakpoint"
                    );
                    ctx.publish(EngineEvent::RunSuspended {
                        run_id,
                        step_id: step.id.clone(),
                        breakpoint_id: breakpoint_id.clone(),
                    });
                    return Ok(RunOutcome::Suspended(SuspendedRun {
                        run_id,
                        step_id: step.id.clone(),
                        breakpoint_id,
                        artifacts: run.artifacts.clone(),
                    }));
                }
                Err(failure) if step.on_failure == FailurePolicy::Continue && failure.is_catchable() => {
                    let message = failure.to_string();
                    let caught = caught_step(step, &failure);
                    self.checkpoint
                        .checkpoint_step_failed(log_id, &message, Some(&caught.record))
                        .await
                        .map_err(halt_at(&step.id))?;
                    absorb(&mut scope, run, &step.id, caught);

                    tracing::warn!(
                        run_id = %run_id,
                        step_id = %step.id,
                        error = %message,
                        "step failed; continuing"
                    );
                    ctx.publish(EngineEvent::StepFailed {
                        run_id,
                        step_id: step.id.clone(),
                        error: message,
                        caught: true,
                    });
                }
                Err(failure) => {
                    let message = failure.to_string();
                    if let Err(e) = self.checkpoint.checkpoint_step_failed(log_id, &message, None).await {
                        tracing::warn!(run_id = %run_id, step_id = %step.id, error = %e, "could not record step failure");
                    }
                    ctx.publish(EngineEvent::StepFailed {
                        run_id,
                        step_id: step.id.clone(),
                        error: message,
                        caught: false,
                    });
                    return Err(Halt {
                        step: Some(step.id.clone()),
                        cause: failure,
                    });
                }
            }

            // Read a cancellation persisted by another process before this
            // snapshot overwrites the status; the next iteration stops.
            self.cancel_requested(ctx).await;
            run.context = steps_context(&scope);
            self.checkpoint.checkpoint_run(run).await.map_err(halt_at(&step.id))?;
        }

        let output = match &def.output {
            Some(template) => binding::resolve_value(template, &scope).map_err(halt_at("output"))?,
            None => default_output(&scope),
        };

        run.status = RunStatus::Succeeded;
        run.result = Some(output.clone());
        run.completed_at = Some(Utc::now());
        run.context = steps_context(&scope);
        self.checkpoint.checkpoint_run(run).await.map_err(|e| Halt {
            step: None,
            cause: e.into(),
        })?;

        let duration_ms = millis(ctx.now().saturating_sub(started));
        tracing::info!(
            run_id = %run_id,
            process = %def.name,
            duration_ms,
            artifacts = run.artifacts.len(),
            "run completed"
        );
        ctx.publish(EngineEvent::RunCompleted {
            run_id,
            process_name: def.name.clone(),
            duration_ms,
            artifacts: run.artifacts.len(),
        });

        Ok(RunOutcome::Completed(RunResult {
            run_id,
            output,
            artifacts: run.artifacts.clone(),
            completed_steps: completed,
            duration_ms,
        }))
    }

    /// Persist the terminal state of a halted run and build its failure.
    async fn finish_failed(
        &self,
        def: &ProcessDefinition,
        run: &mut Run,
        ctx: &RunContext,
        halt: Halt,
    ) -> RunFailure {
        let Halt { step, cause } = halt;
        let run_id = ctx.run_id();
        run.artifacts.extend(
            cause
                .completed_results()
                .into_iter()
                .flat_map(|result| result.artifacts.iter().cloned()),
        );

        let error = cause.to_string();
        let cancelled = matches!(cause, StepFailure::Cancelled);
        run.status = if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Failed
        };
        run.failed_step = step.clone();
        run.error = Some(error.clone());
        run.completed_at = Some(Utc::now());
        if let Err(e) = self.checkpoint.checkpoint_run(run).await {
            tracing::warn!(run_id = %run_id, error = %e, "could not record run failure");
        }

        if cancelled {
            tracing::info!(run_id = %run_id, next_step = ?step, "run stopped after cancellation");
            ctx.publish(EngineEvent::RunCancelled { run_id });
        } else {
            tracing::error!(
                run_id = %run_id,
                process = %def.name,
                failed_step = ?step,
                kind = cause.kind(),
                error = %error,
                "run failed"
            );
            ctx.publish(EngineEvent::RunFailed {
                run_id,
                process_name: def.name.clone(),
                failed_step: step.clone().unwrap_or_default(),
                error,
            });
        }

        RunFailure {
            run_id,
            failed_step: step,
            cause,
            partial_artifacts: run.artifacts.clone(),
        }
    }

    /// Cancellation is requested in-process (token) or by another process
    /// (persisted status).
    async fn cancel_requested(&self, ctx: &RunContext) -> bool {
        if ctx.is_cancelled() {
            return true;
        }
        match self.checkpoint.run_status(ctx.run_id()).await {
            Ok(RunStatus::Cancelled) => {
                ctx.cancellation().cancel();
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(run_id = %ctx.run_id(), error = %e, "could not read run status");
                false
            }
        }
    }

    /// Completes once the stored run status reads `cancelled`, checked at the
    /// gate's poll interval.
    async fn persisted_cancel(&self, ctx: &RunContext) {
        loop {
            tokio::time::sleep(self.gate.poll_interval()).await;
            if self.cancel_requested(ctx).await {
                return;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Step interpreters
    // -----------------------------------------------------------------------

    async fn run_step(
        &self,
        index: usize,
        step: &StepDescriptor,
        scope: &Value,
        ctx: &RunContext,
    ) -> Result<StepOutcome, StepFailure> {
        match &step.kind {
            StepKind::Task { kind, args, retry } => {
                let hint = format!("{index}:{}", step.id);
                let invocation = self.plan(kind, args, &step.id, &hint, scope, ctx)?;
                let result = self
                    .executor
                    .execute_with_retry(&invocation, retry.as_ref(), ctx)
                    .await?;
                Ok(StepOutcome::Done(StepDone {
                    record: task_record(&result),
                    artifacts: result.artifacts,
                    branches: Vec::new(),
                }))
            }
            StepKind::Parallel { policy, branches } => {
                let policy = policy.unwrap_or(self.options.default_parallel_policy);
                self.run_parallel(index, branches, policy, scope, ctx).await
            }
            StepKind::Breakpoint {
                title,
                question,
                summary,
                files,
                on_reject,
            } => {
                let title = binding::interpolate(title, scope)?;
                let question = binding::interpolate(question, scope)?;
                let context = BreakpointContext {
                    run_id: ctx.run_id(),
                    summary: binding::resolve_value(summary, scope)?,
                    files: files.clone(),
                };
                self.run_breakpoint(&step.id, &title, &question, context, *on_reject, ctx)
                    .await
            }
        }
    }

    /// Resolve bindings and build the invocation for one task.
    fn plan(
        &self,
        kind: &str,
        args: &Value,
        step_id: &str,
        hint: &str,
        scope: &Value,
        ctx: &RunContext,
    ) -> Result<TaskInvocation, StepFailure> {
        let args = binding::resolve_value(args, scope)?;
        let effect_id = ctx.new_effect_id(kind, hint);
        let task_ctx = TaskContext {
            run_id: ctx.run_id(),
            step_id,
            effect_id: &effect_id,
        };
        let spec = self.registry.resolve(kind, &args, &task_ctx)?;
        Ok(TaskInvocation {
            effect_id,
            step_id: step_id.to_string(),
            kind: kind.to_string(),
            args,
            spec,
        })
    }

    async fn run_parallel(
        &self,
        index: usize,
        branches: &[ParallelBranch],
        policy: ParallelPolicy,
        scope: &Value,
        ctx: &RunContext,
    ) -> Result<StepOutcome, StepFailure> {
        // Plan every branch before launching any.
        let mut planned = Vec::with_capacity(branches.len());
        for (position, branch) in branches.iter().enumerate() {
            let hint = format!("{index}.{position}:{}", branch.id);
            let invocation = self.plan(&branch.kind, &branch.args, &branch.id, &hint, scope, ctx)?;
            planned.push((invocation, branch.retry.clone()));
        }

        let futures: Vec<_> = planned
            .into_iter()
            .map(|(invocation, retry)| {
                let executor = Arc::clone(&self.executor);
                let ctx = ctx.clone();
                async move {
                    executor
                        .execute_with_retry(&invocation, retry.as_ref(), &ctx)
                        .await
                }
            })
            .collect();

        let results = ParallelCoordinator::all(futures, policy)
            .await
            .map_err(StepFailure::Parallel)?;

        let outputs: Vec<Value> = results.iter().map(|r| r.output.clone()).collect();
        let artifacts: Vec<Artifact> = results.iter().flat_map(|r| r.artifacts.iter().cloned()).collect();
        let branch_records = branches
            .iter()
            .zip(&results)
            .map(|(branch, result)| (branch.id.clone(), task_record(result)))
            .collect();

        Ok(StepOutcome::Done(StepDone {
            record: json!({
                "success": true,
                "output": outputs,
                "artifacts": artifacts,
            }),
            artifacts,
            branches: branch_records,
        }))
    }

    async fn run_breakpoint(
        &self,
        step_id: &str,
        title: &str,
        question: &str,
        context: BreakpointContext,
        on_reject: RejectPolicy,
        ctx: &RunContext,
    ) -> Result<StepOutcome, StepFailure> {
        let resolution = match self.options.breakpoint_mode {
            BreakpointMode::Block => {
                tokio::select! {
                    resolution = self.gate.raise(step_id, title, question, context, ctx) => resolution?,
                    () = ctx.cancellation().cancelled() => return Err(StepFailure::Cancelled),
                    () = self.persisted_cancel(ctx) => return Err(StepFailure::Cancelled),
                }
            }
            BreakpointMode::Suspend => {
                let breakpoint = self.gate.open(step_id, title, question, context, ctx).await?;
                match breakpoint.resolution {
                    Some(resolution) => resolution,
                    None => {
                        return Ok(StepOutcome::Waiting {
                            breakpoint_id: breakpoint.id,
                        });
                    }
                }
            }
        };

        let id = breakpoint_id(&ctx.run_id(), step_id);
        let rejected = resolution.decision == Decision::Reject;
        if rejected && on_reject == RejectPolicy::Fail {
            return Err(StepFailure::BreakpointRejected { breakpoint_id: id });
        }

        let payload = resolution.payload.unwrap_or(Value::Null);
        Ok(StepOutcome::Done(StepDone {
            record: json!({
                "success": !rejected,
                "decision": resolution.decision.as_str(),
                "payload": payload,
                "output": payload,
                "breakpoint_id": id,
            }),
            artifacts: Vec::new(),
            branches: Vec::new(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Scope helpers
// ---------------------------------------------------------------------------

fn task_record(result: &TaskResult) -> Value {
    json!({
        "success": result.success,
        "output": result.output,
        "artifacts": result.artifacts,
        "effect_id": result.effect_id,
    })
}

/// Record of a step whose failure was caught. Parallel branches that finished
/// before the failure keep their records and artifacts.
fn caught_step(step: &StepDescriptor, failure: &StepFailure) -> StepDone {
    let mut artifacts = Vec::new();
    let mut branches = Vec::new();
    if let (StepKind::Parallel { branches: declared, .. }, StepFailure::Parallel(parallel)) = (&step.kind, failure) {
        for (branch, result) in declared.iter().zip(&parallel.completed) {
            if let Some(result) = result {
                artifacts.extend(result.artifacts.iter().cloned());
                branches.push((branch.id.clone(), task_record(result)));
            }
        }
    }

    let record = json!({
        "success": false,
        "output": Value::Null,
        "artifacts": artifacts,
        "error": { "kind": failure.kind(), "message": failure.to_string() },
    });
    StepDone {
        record,
        artifacts,
        branches,
    }
}

/// Fold a finished step into the scope and the run.
fn absorb(scope: &mut Value, run: &mut Run, step_id: &str, done: StepDone) {
    let Some(steps) = scope.get_mut("steps").and_then(Value::as_object_mut) else {
        return;
    };
    for (id, record) in done.branches {
        steps.insert(id, record);
    }
    steps.insert(step_id.to_string(), done.record);
    run.artifacts.extend(done.artifacts);
}

fn steps_context(scope: &Value) -> Value {
    json!({ "steps": scope.get("steps").cloned().unwrap_or_else(|| json!({})) })
}

/// Run result when the definition declares no output template.
fn default_output(scope: &Value) -> Value {
    let outputs: Map<String, Value> = scope
        .get("steps")
        .and_then(Value::as_object)
        .map(|steps| {
            steps
                .iter()
                .map(|(id, record)| (id.clone(), record.get("output").cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .unwrap_or_default();
    Value::Object(outputs)
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::scripted::ScriptedAgent;
    use crate::engine::definition::parse_process_yaml;
    use crate::repository::memory::{InMemoryBreakpointStore, InMemoryRecordStore, InMemoryRunRepository};
    use taskloom_types::run::StepStatus;
    use taskloom_types::task::{AgentContract, TaskSpec};

    type TestRunner = ProcessRunner<InMemoryRunRepository, InMemoryBreakpointStore, InMemoryRecordStore, ScriptedAgent>;

    struct Harness {
        runner: Arc<TestRunner>,
        agent: ScriptedAgent,
        runs: InMemoryRunRepository,
        events: EventBus,
    }

    fn registry(kinds: &[&str]) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for kind in kinds {
            let kind = kind.to_string();
            registry.define_fn(kind.clone(), move |args, ctx| {
                Ok(TaskSpec {
                    kind: kind.clone(),
                    title: format!("{kind} task"),
                    agent: AgentContract {
                        context: args.clone(),
                        ..AgentContract::new("worker", kind.clone())
                    },
                    io: ctx.io(),
                    labels: vec![],
                })
            });
        }
        registry
    }

    fn harness(mode: BreakpointMode) -> Harness {
        let events = EventBus::new(256);
        let agent = ScriptedAgent::new();
        let runs = InMemoryRunRepository::new();
        let gate = BreakpointGate::new(InMemoryBreakpointStore::new(), events.clone())
            .with_poll_interval(Duration::from_millis(10));
        let runner = ProcessRunner::new(
            Arc::new(registry(&["a", "b", "c", "d"])),
            Arc::new(TaskExecutor::new(InMemoryRecordStore::new(), agent.clone())),
            Arc::new(gate),
            runs.clone(),
            events.clone(),
        )
        .with_options(RunnerOptions {
            breakpoint_mode: mode,
            ..RunnerOptions::default()
        });

        for kind in ["a", "b", "c", "d"] {
            agent.respond_json(
                kind,
                &json!({
                    "summary": format!("{kind} done"),
                    "artifacts": [{"path": format!("{kind}.md"), "format": "markdown"}]
                }),
            );
        }

        Harness {
            runner: Arc::new(runner),
            agent,
            runs,
            events,
        }
    }

    fn pipeline() -> ProcessDefinition {
        parse_process_yaml(
            r#"
name: pipeline
steps:
  - { id: first, type: task, kind: a, args: { topic: "{{ inputs.topic }}" } }
  - id: fan
    type: parallel
    branches:
      - { id: left, kind: b, args: { from: "{{ steps.first.output.summary }}" } }
      - { id: right, kind: c }
  - { id: review, type: breakpoint, title: Review, question: "Ship {{ inputs.topic }}?" }
  - { id: last, type: task, kind: d, args: { decision: "{{ steps.review.decision }}" } }
"#,
        )
        .unwrap()
    }

    fn paths(artifacts: &[Artifact]) -> Vec<&str> {
        artifacts.iter().map(|a| a.path.as_str()).collect()
    }

    fn approve_on_raise(h: &Harness, decision: Decision) -> tokio::task::JoinHandle<()> {
        let mut rx = h.events.subscribe();
        let runner = Arc::clone(&h.runner);
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let EngineEvent::BreakpointRaised { breakpoint_id, .. } = event {
                    runner.gate().resolve(&breakpoint_id, decision, None).await.unwrap();
                    break;
                }
            }
        })
    }

    #[tokio::test]
    async fn test_full_pipeline_collects_artifacts_in_order() {
        let h = harness(BreakpointMode::Block);
        // `left` finishes after `right`; order must still follow the definition.
        h.agent.delay("b", Duration::from_millis(30));
        let resolver = approve_on_raise(&h, Decision::Approve);

        let outcome = h.runner.run(&pipeline(), json!({"topic": "search"})).await.unwrap();
        resolver.await.unwrap();

        let RunOutcome::Completed(result) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(paths(&result.artifacts), vec!["a.md", "b.md", "c.md", "d.md"]);
        assert_eq!(result.completed_steps, vec!["first", "fan", "review", "last"]);
        assert_eq!(result.output["fan"][0]["summary"], "b done");
        assert_eq!(result.output["fan"][1]["summary"], "c done");

        let requests = h.agent.requests();
        let left = requests.iter().find(|r| r.kind == "b").unwrap();
        assert_eq!(left.context["from"], "a done");
        let last = requests.iter().find(|r| r.kind == "d").unwrap();
        assert_eq!(last.context["decision"], "approve");

        let run = h.runs.get_run(&result.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.artifacts.len(), 4);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_branch_failure_keeps_partial_artifacts() {
        let h = harness(BreakpointMode::Block);
        h.agent.fail("c", "compiler exploded").delay("c", Duration::from_millis(50));

        let failure = h.runner.run(&pipeline(), json!({"topic": "search"})).await.unwrap_err();

        assert_eq!(failure.failed_step.as_deref(), Some("fan"));
        assert_eq!(failure.kind(), "parallel_failure");
        assert_eq!(paths(&failure.partial_artifacts), vec!["a.md", "b.md"]);
        match &failure.cause {
            StepFailure::Parallel(parallel) => {
                assert_eq!(parallel.failed_index, 1);
                assert_eq!(parallel.error.kind(), "agent_invocation_error");
            }
            other => panic!("expected parallel failure, got {other:?}"),
        }

        // Nothing after the group ran.
        assert!(h.runner.gate().pending(None).await.unwrap().is_empty());
        assert_eq!(h.agent.calls("d"), 0);

        let run = h.runs.get_run(&failure.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failed_step.as_deref(), Some("fan"));
    }

    #[tokio::test]
    async fn test_suspend_then_resume_reuses_records() {
        let h = harness(BreakpointMode::Suspend);
        let def = pipeline();

        let outcome = h.runner.run(&def, json!({"topic": "search"})).await.unwrap();
        let RunOutcome::Suspended(suspended) = outcome else {
            panic!("expected a suspended run");
        };
        assert_eq!(suspended.step_id, "review");
        assert_eq!(paths(&suspended.artifacts), vec!["a.md", "b.md", "c.md"]);
        let run = h.runs.get_run(&suspended.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Suspended);

        h.runner
            .gate()
            .resolve(&suspended.breakpoint_id, Decision::Edit, Some(json!({"scope": "narrow"})))
            .await
            .unwrap();

        let resumed = h.runner.resume(suspended.run_id, &def).await.unwrap();
        let RunOutcome::Completed(result) = resumed else {
            panic!("expected the resumed run to complete");
        };
        assert_eq!(result.run_id, suspended.run_id);
        assert_eq!(paths(&result.artifacts), vec!["a.md", "b.md", "c.md", "d.md"]);
        assert_eq!(result.output["review"], json!({"scope": "narrow"}));

        // Replayed tasks came from their output records.
        assert_eq!(h.agent.calls("a"), 1);
        assert_eq!(h.agent.calls("b"), 1);
        assert_eq!(h.agent.calls("d"), 1);

        let again = h.runner.resume(suspended.run_id, &def).await.unwrap_err();
        assert!(matches!(
            again.cause,
            StepFailure::Checkpoint(CheckpointError::NotResumable { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_breakpoint_fails_run() {
        let h = harness(BreakpointMode::Block);
        let resolver = approve_on_raise(&h, Decision::Reject);

        let failure = h.runner.run(&pipeline(), json!({"topic": "search"})).await.unwrap_err();
        resolver.await.unwrap();

        assert_eq!(failure.failed_step.as_deref(), Some("review"));
        assert_eq!(failure.kind(), "breakpoint_rejected");
        assert_eq!(paths(&failure.partial_artifacts), vec!["a.md", "b.md", "c.md"]);
        assert_eq!(h.agent.calls("d"), 0);
    }

    #[tokio::test]
    async fn test_on_failure_continue_records_failure() {
        let h = harness(BreakpointMode::Block);
        h.agent.fail("a", "no answer");
        let def = parse_process_yaml(
            r#"
name: tolerant
steps:
  - { id: flaky, type: task, kind: a, on_failure: continue }
  - { id: after, type: task, kind: b, args: { ok: "{{ steps.flaky.success }}" } }
"#,
        )
        .unwrap();

        let outcome = h.runner.run(&def, json!({})).await.unwrap();
        let RunOutcome::Completed(result) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(paths(&result.artifacts), vec!["b.md"]);
        assert_eq!(result.completed_steps, vec!["after"]);

        let after = h.agent.requests().into_iter().find(|r| r.kind == "b").unwrap();
        assert_eq!(after.context["ok"], false);

        let logs = h.runs.list_step_logs(&result.run_id).await.unwrap();
        assert_eq!(logs[0].status, StepStatus::Failed);
        assert_eq!(logs[0].output.as_ref().unwrap()["error"]["kind"], "agent_invocation_error");
        assert_eq!(logs[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_stops_scheduling() {
        let h = harness(BreakpointMode::Block);
        h.agent.delay("a", Duration::from_millis(50));
        let def = parse_process_yaml(
            r#"
name: two
steps:
  - { id: first, type: task, kind: a }
  - { id: second, type: task, kind: b }
"#,
        )
        .unwrap();

        let mut rx = h.events.subscribe();
        let ctx = RunContext::new(Uuid::now_v7(), "two", h.events.clone());
        let handle = {
            let runner = Arc::clone(&h.runner);
            let ctx = ctx.clone();
            tokio::spawn(async move { runner.execute(&def, json!({}), &ctx).await })
        };

        while let Ok(event) = rx.recv().await {
            if matches!(event, EngineEvent::StepStarted { ref step_id, .. } if step_id == "first") {
                break;
            }
        }
        h.runner.cancel(ctx.run_id()).await.unwrap();

        let failure = handle.await.unwrap().unwrap_err();
        assert!(matches!(failure.cause, StepFailure::Cancelled));
        assert_eq!(failure.failed_step.as_deref(), Some("second"));
        assert_eq!(paths(&failure.partial_artifacts), vec!["a.md"]);
        assert_eq!(h.agent.calls("b"), 0);

        let run = h.runs.get_run(&ctx.run_id()).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(h.runner.cancel(ctx.run_id()).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_from_another_process_releases_blocked_breakpoint() {
        let h = harness(BreakpointMode::Block);
        let def = parse_process_yaml(
            r#"
name: gated
steps:
  - { id: first, type: task, kind: a }
  - { id: review, type: breakpoint, title: Review, question: "Go?" }
  - { id: last, type: task, kind: b }
"#,
        )
        .unwrap();

        let mut rx = h.events.subscribe();
        let ctx = RunContext::new(Uuid::now_v7(), "gated", h.events.clone());
        let handle = {
            let runner = Arc::clone(&h.runner);
            let ctx = ctx.clone();
            tokio::spawn(async move { runner.execute(&def, json!({}), &ctx).await })
        };
        while let Ok(event) = rx.recv().await {
            if matches!(event, EngineEvent::BreakpointRaised { .. }) {
                break;
            }
        }

        // Only the stored status changes; this runner's token is untouched.
        CheckpointManager::new(h.runs.clone())
            .request_cancel(ctx.run_id())
            .await
            .unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(failure.cause, StepFailure::Cancelled));
        assert_eq!(failure.failed_step.as_deref(), Some("review"));
        assert_eq!(paths(&failure.partial_artifacts), vec!["a.md"]);
        assert_eq!(h.agent.calls("b"), 0);
        assert_eq!(h.runner.gate().waiting(), 0);

        let run = h.runs.get_run(&ctx.run_id()).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_task_kind_rejected_before_start() {
        let h = harness(BreakpointMode::Block);
        let def = parse_process_yaml("name: odd\nsteps:\n  - { id: x, type: task, kind: mystery }").unwrap();

        let failure = h.runner.run(&def, json!({})).await.unwrap_err();
        assert_eq!(failure.kind(), "definition");
        assert!(failure.failed_step.is_none());
        assert!(h.runs.list_runs(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_output_template() {
        let h = harness(BreakpointMode::Block);
        let def = parse_process_yaml(
            r#"
name: templated
steps:
  - { id: only, type: task, kind: a }
output:
  headline: "Result: {{ steps.only.output.summary }}"
  files: "{{ steps.only.artifacts }}"
"#,
        )
        .unwrap();

        let RunOutcome::Completed(result) = h.runner.run(&def, json!({})).await.unwrap() else {
            panic!("expected a completed run");
        };
        assert_eq!(result.output["headline"], "Result: a done");
        assert_eq!(result.output["files"][0]["path"], "a.md");
    }
}
