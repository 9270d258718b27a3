//! `run`, `resume` and `validate`: commands that take a process file.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use serde_json::{Value, json};
use taskloom_core::engine::definition::{load_process_file, task_kinds, validate_against_registry};
use taskloom_core::engine::{BreakpointMode, RunContext, RunFailure, RunOutcome};
use taskloom_core::event::EventBus;
use taskloom_types::artifact::Artifact;
use taskloom_types::event::EngineEvent;
use taskloom_types::process::{ProcessDefinition, StepKind};
use uuid::Uuid;

use super::output::{format_duration_ms, preview, print_json, table};
use crate::state::{AppState, ConcreteRunner, load_registry};

fn load_definition(process: &Path) -> Result<ProcessDefinition> {
    load_process_file(process).with_context(|| format!("Failed to load process {}", process.display()))
}

fn mode(suspend: bool) -> BreakpointMode {
    if suspend {
        BreakpointMode::Suspend
    } else {
        BreakpointMode::Block
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(
    state: &AppState,
    process: &Path,
    inputs: &str,
    tasks: Option<&Path>,
    suspend: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let def = load_definition(process)?;
    let inputs: Value = serde_json::from_str(inputs).context("Invalid --inputs JSON")?;
    if !inputs.is_object() {
        bail!("--inputs must be a JSON object");
    }

    let registry = load_registry(process, tasks)?;
    let runner = state.runner(registry, mode(suspend))?;

    let ctx = RunContext::new(Uuid::now_v7(), def.name.clone(), state.events.clone());
    let run_id = ctx.run_id();

    let progress = (!json && !quiet).then(|| spawn_progress(&state.events, run_id));
    let outcome = until_interrupted(&runner, run_id, runner.execute(&def, inputs, &ctx)).await;
    finish_progress(progress).await;

    render_outcome(outcome, json, quiet)
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

pub async fn handle_resume(
    state: &AppState,
    run_id: Uuid,
    process: &Path,
    tasks: Option<&Path>,
    suspend: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let def = load_definition(process)?;
    let registry = load_registry(process, tasks)?;
    let runner = state.runner(registry, mode(suspend))?;

    let progress = (!json && !quiet).then(|| spawn_progress(&state.events, run_id));
    let outcome = until_interrupted(&runner, run_id, runner.resume(run_id, &def)).await;
    finish_progress(progress).await;

    render_outcome(outcome, json, quiet)
}

/// Drive `run` to completion. Ctrl-C cancels the run once; the runner then
/// stops before its next step and `run` returns the cancellation.
async fn until_interrupted<F>(runner: &ConcreteRunner, run_id: Uuid, run: F) -> Result<RunOutcome, RunFailure>
where
    F: Future<Output = Result<RunOutcome, RunFailure>>,
{
    tokio::pin!(run);
    let mut interrupted = false;
    loop {
        tokio::select! {
            outcome = &mut run => return outcome,
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                    continue;
                }
                eprintln!("  {} Cancelling run {run_id}...", style("!").yellow().bold());
                if let Err(e) = runner.cancel(run_id).await {
                    tracing::warn!(run_id = %run_id, error = %e, "cancel failed");
                }
            }
        }
    }
}

fn render_outcome(outcome: Result<RunOutcome, RunFailure>, json: bool, quiet: bool) -> Result<()> {
    match outcome {
        Ok(RunOutcome::Completed(result)) => {
            if json {
                return print_json(&json!({
                    "run_id": result.run_id.to_string(),
                    "status": "succeeded",
                    "output": result.output,
                    "artifacts": result.artifacts,
                    "completed_steps": result.completed_steps,
                    "duration_ms": result.duration_ms,
                }));
            }
            if quiet {
                return Ok(());
            }
            println!();
            println!(
                "  {} Run {} succeeded in {}",
                style("*").green().bold(),
                style(result.run_id).cyan(),
                format_duration_ms(result.duration_ms)
            );
            print_artifacts(&result.artifacts);
            println!("  Output: {}", preview(&result.output, 200));
            println!();
            Ok(())
        }
        Ok(RunOutcome::Suspended(suspended)) => {
            if json {
                return print_json(&json!({
                    "run_id": suspended.run_id.to_string(),
                    "status": "suspended",
                    "step_id": suspended.step_id,
                    "breakpoint_id": suspended.breakpoint_id,
                    "artifacts": suspended.artifacts,
                }));
            }
            if quiet {
                return Ok(());
            }
            println!();
            println!(
                "  {} Run {} suspended at step '{}'",
                style("||").yellow().bold(),
                style(suspended.run_id).cyan(),
                suspended.step_id
            );
            print_artifacts(&suspended.artifacts);
            println!(
                "  Answer with: {}",
                style(format!("taskloom breakpoint resolve {} approve", suspended.breakpoint_id)).dim()
            );
            println!(
                "  Then:        {}",
                style(format!("taskloom resume {} <process>", suspended.run_id)).dim()
            );
            println!();
            Ok(())
        }
        Err(failure) => {
            if json {
                let status = if failure.kind() == "cancelled" { "cancelled" } else { "failed" };
                print_json(&json!({
                    "run_id": failure.run_id.to_string(),
                    "status": status,
                    "failed_step": failure.failed_step,
                    "kind": failure.kind(),
                    "error": failure.cause.to_string(),
                    "partial_artifacts": failure.partial_artifacts,
                }))?;
            } else if !quiet && !failure.partial_artifacts.is_empty() {
                println!();
                println!("  Artifacts produced before the failure:");
                print_artifacts(&failure.partial_artifacts);
                println!();
            }
            Err(anyhow::Error::new(failure))
        }
    }
}

fn print_artifacts(artifacts: &[Artifact]) {
    if artifacts.is_empty() {
        return;
    }
    println!("  Artifacts:");
    for artifact in artifacts {
        match &artifact.label {
            Some(label) => println!("    - {} {}", artifact.path, style(format!("({label})")).dim()),
            None => println!("    - {}", artifact.path),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

fn spawn_progress(events: &EventBus, run_id: Uuid) -> tokio::task::JoinHandle<()> {
    let mut run_events = events.subscribe_run(run_id);
    tokio::spawn(async move {
        while let Some(event) = run_events.next().await {
            print_event(&event);
        }
    })
}

/// Let the display drain the final events, then stop it.
async fn finish_progress(progress: Option<tokio::task::JoinHandle<()>>) {
    if let Some(mut handle) = progress {
        if tokio::time::timeout(Duration::from_millis(200), &mut handle).await.is_err() {
            handle.abort();
        }
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::RunStarted {
            run_id,
            process_name,
            resumed,
        } => {
            let verb = if *resumed { "Resuming" } else { "Starting" };
            println!();
            println!("  {verb} {} run {}", style(process_name).cyan(), style(run_id).dim());
        }
        EngineEvent::StepStarted { step_id, step_type, .. } => {
            println!("  {} {step_id} {}", style(">").dim(), style(format!("({step_type})")).dim());
        }
        EngineEvent::TaskCompleted {
            kind,
            effect_id,
            duration_ms,
            cached,
            ..
        } => {
            let note = if *cached { " cached" } else { "" };
            println!(
                "      {} {kind} {} {}{note}",
                style("+").green(),
                style(effect_id).dim(),
                format_duration_ms(*duration_ms)
            );
        }
        EngineEvent::StepCompleted {
            step_id, duration_ms, ..
        } => {
            println!(
                "  {} {step_id} {}",
                style("ok").green().bold(),
                style(format_duration_ms(*duration_ms)).dim()
            );
        }
        EngineEvent::StepFailed {
            step_id, error, caught, ..
        } => {
            let note = if *caught { " (continuing)" } else { "" };
            println!("  {} {step_id}: {error}{note}", style("x").red().bold());
        }
        EngineEvent::BreakpointRaised {
            breakpoint_id, title, ..
        } => {
            println!("  {} {title}", style("?").yellow().bold());
            println!(
                "    waiting for: {}",
                style(format!("taskloom breakpoint resolve {breakpoint_id} <approve|reject|edit>")).dim()
            );
        }
        EngineEvent::BreakpointResolved {
            breakpoint_id, decision, ..
        } => {
            println!("    {} {breakpoint_id} {decision}", style("=").green());
        }
        EngineEvent::RunCancelled { .. } => {
            println!("  {} cancelled", style("x").yellow().bold());
        }
        EngineEvent::RunSuspended { .. }
        | EngineEvent::RunCompleted { .. }
        | EngineEvent::RunFailed { .. } => {}
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn handle_validate(process: &Path, tasks: Option<&Path>, json: bool) -> Result<()> {
    let def = load_definition(process)?;
    let registry = load_registry(process, tasks)?;
    validate_against_registry(&def, &registry).context("Process uses task kinds with no template")?;

    if json {
        let steps: Vec<_> = def
            .steps
            .iter()
            .map(|s| json!({"id": s.id, "type": s.step_type()}))
            .collect();
        return print_json(&json!({
            "valid": true,
            "name": def.name,
            "version": def.version,
            "steps": steps,
            "task_kinds": task_kinds(&def),
        }));
    }

    let mut table = table(&["Step", "Type", "Detail"]);
    for step in &def.steps {
        let detail = match &step.kind {
            StepKind::Task { kind, .. } => kind.clone(),
            StepKind::Parallel { branches, policy } => {
                let kinds: Vec<_> = branches.iter().map(|b| format!("{}:{}", b.id, b.kind)).collect();
                match policy {
                    Some(p) => format!("{} [{p:?}]", kinds.join(", ")),
                    None => kinds.join(", "),
                }
            }
            StepKind::Breakpoint { title, .. } => title.clone(),
        };
        table.add_row(vec![step.display_name().to_string(), step.step_type().to_string(), detail]);
    }

    println!();
    println!(
        "  {} {} v{} is valid",
        style("*").green().bold(),
        style(&def.name).cyan(),
        def.version
    );
    println!();
    println!("{table}");
    println!();
    Ok(())
}
