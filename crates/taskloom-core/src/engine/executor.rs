//! Task executor: record input, invoke the agent, validate, record output.
//!
//! The output record is the commit point. If it exists for an effect ID the
//! task is done and re-execution returns the stored result without touching
//! the agent; if it does not, the task is re-run from scratch (the input
//! record is simply rewritten).

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use taskloom_types::artifact::Artifact;
use taskloom_types::event::EngineEvent;
use taskloom_types::process::RetryConfig;
use taskloom_types::task::{AgentRequest, InputRecord, OutputRecord, TaskInvocation, TaskResult};

use super::context::RunContext;
use super::error::TaskError;
use super::retry::{RetryAction, RetryHandler};
use crate::agent::AgentInvoker;
use crate::output::{extract_artifacts, repair, schema};
use crate::repository::RecordStore;

pub struct TaskExecutor<S: RecordStore, A: AgentInvoker> {
    records: S,
    agent: A,
}

impl<S: RecordStore, A: AgentInvoker> TaskExecutor<S, A> {
    pub fn new(records: S, agent: A) -> Self {
        Self { records, agent }
    }

    pub fn records(&self) -> &S {
        &self.records
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// Execute one invocation with a single attempt.
    pub async fn execute(
        &self,
        invocation: &TaskInvocation,
        ctx: &RunContext,
    ) -> Result<TaskResult, TaskError> {
        self.execute_with_retry(invocation, None, ctx).await
    }

    /// Execute one invocation, retrying agent/parse/schema failures per `retry`.
    pub async fn execute_with_retry(
        &self,
        invocation: &TaskInvocation,
        retry: Option<&RetryConfig>,
        ctx: &RunContext,
    ) -> Result<TaskResult, TaskError> {
        let run_id = ctx.run_id();
        let started = ctx.now();
        let spec = &invocation.spec;
        let effect_id = &invocation.effect_id;

        if let Some(cached) = self.cached_result(invocation, ctx).await? {
            tracing::debug!(
                run_id = %run_id,
                effect_id = %effect_id,
                kind = %invocation.kind,
                "output record present; skipping agent"
            );
            ctx.publish(EngineEvent::TaskCompleted {
                run_id,
                step_id: invocation.step_id.clone(),
                effect_id: effect_id.to_string(),
                kind: invocation.kind.clone(),
                duration_ms: cached.elapsed_ms,
                cached: true,
            });
            return Ok(cached);
        }

        schema::check_schema(&spec.agent.output_schema).map_err(|message| TaskError::InvalidSchema {
            kind: invocation.kind.clone(),
            message,
        })?;

        let input = InputRecord {
            effect_id: effect_id.clone(),
            run_id,
            step_id: invocation.step_id.clone(),
            kind: invocation.kind.clone(),
            title: spec.title.clone(),
            args: invocation.args.clone(),
            agent: spec.agent.clone(),
            labels: spec.labels.clone(),
            written_at: Utc::now(),
        };
        let input = serde_json::to_value(&input).map_err(|e| TaskError::Record(e.to_string()))?;
        self.records
            .write_record(&run_id, &spec.io.input_path, &input)
            .await
            .map_err(|e| TaskError::Record(e.to_string()))?;

        let base = AgentRequest::from_spec(effect_id, spec);
        let mut request = base.clone();
        let mut attempt: u32 = 1;
        let (output, artifacts) = loop {
            tracing::debug!(
                run_id = %run_id,
                effect_id = %effect_id,
                kind = %invocation.kind,
                attempt,
                "invoking agent"
            );
            match self.attempt(invocation, &request).await {
                Ok(checked) => break checked,
                Err(err) => {
                    let Some(config) = retry.filter(|c| RetryHandler::should_retry(c, attempt, &err)) else {
                        tracing::warn!(
                            run_id = %run_id,
                            effect_id = %effect_id,
                            kind = %invocation.kind,
                            attempt,
                            error = %err,
                            "task failed"
                        );
                        return Err(err);
                    };
                    tracing::warn!(
                        run_id = %run_id,
                        effect_id = %effect_id,
                        attempt,
                        max_attempts = config.max_attempts,
                        error = %err,
                        "task attempt failed; retrying"
                    );
                    request = match RetryHandler::prepare_retry(config, &err, attempt) {
                        RetryAction::Rerun => base.clone(),
                        RetryAction::SelfCorrect { instruction } => {
                            let mut corrected = base.clone();
                            corrected.instructions.push(instruction);
                            corrected
                        }
                    };
                    attempt += 1;
                }
            }
        };

        let elapsed = ctx.now().saturating_sub(started);
        let result = TaskResult {
            effect_id: effect_id.clone(),
            kind: invocation.kind.clone(),
            success: true,
            output,
            artifacts,
            elapsed_ms: duration_ms(elapsed),
        };

        let record = serde_json::to_value(OutputRecord::from_result(&result, Utc::now()))
            .map_err(|e| TaskError::Record(e.to_string()))?;
        self.records
            .write_record(&run_id, &spec.io.output_path, &record)
            .await
            .map_err(|e| TaskError::Record(e.to_string()))?;

        tracing::info!(
            run_id = %run_id,
            effect_id = %effect_id,
            kind = %invocation.kind,
            attempts = attempt,
            elapsed_ms = result.elapsed_ms,
            artifacts = result.artifacts.len(),
            "task completed"
        );
        ctx.publish(EngineEvent::TaskCompleted {
            run_id,
            step_id: invocation.step_id.clone(),
            effect_id: effect_id.to_string(),
            kind: invocation.kind.clone(),
            duration_ms: result.elapsed_ms,
            cached: false,
        });

        Ok(result)
    }

    /// Read back the stored result for this invocation, if one was committed.
    pub async fn cached_result(
        &self,
        invocation: &TaskInvocation,
        ctx: &RunContext,
    ) -> Result<Option<TaskResult>, TaskError> {
        let stored = self
            .records
            .read_record(&ctx.run_id(), &invocation.spec.io.output_path)
            .await
            .map_err(|e| TaskError::Record(e.to_string()))?;
        let Some(stored) = stored else {
            return Ok(None);
        };
        let record: OutputRecord = serde_json::from_value(stored).map_err(|e| {
            TaskError::Record(format!(
                "unreadable output record for {}: {e}",
                invocation.effect_id
            ))
        })?;
        if record.effect_id != invocation.effect_id {
            return Err(TaskError::Record(format!(
                "output record at {} belongs to {}, expected {}",
                invocation.spec.io.output_path, record.effect_id, invocation.effect_id
            )));
        }
        Ok(Some(record.into_result()))
    }

    /// One agent round-trip: invoke, repair, parse, validate, extract artifacts.
    async fn attempt(
        &self,
        invocation: &TaskInvocation,
        request: &AgentRequest,
    ) -> Result<(Value, Vec<Artifact>), TaskError> {
        let effect_id = &invocation.effect_id;
        let raw = self
            .agent
            .invoke(request)
            .await
            .map_err(|e| TaskError::AgentInvocation {
                effect_id: effect_id.clone(),
                message: e.to_string(),
            })?;

        let text = repair::repair(raw.as_bytes());
        let output: Value =
            serde_json::from_str(&text).map_err(|e| TaskError::MalformedOutput {
                effect_id: effect_id.clone(),
                message: e.to_string(),
            })?;

        schema::validate(&output, &invocation.spec.agent.output_schema).map_err(|violations| {
            TaskError::SchemaViolation {
                effect_id: effect_id.clone(),
                violations,
            }
        })?;

        let artifacts = extract_artifacts(&output).map_err(|violation| TaskError::SchemaViolation {
            effect_id: effect_id.clone(),
            violations: vec![violation],
        })?;
        Ok((output, artifacts))
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
