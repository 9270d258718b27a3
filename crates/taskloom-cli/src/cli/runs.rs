//! `status`, `logs`, `cancel` and `record`: commands on stored runs.

use anyhow::{Result, anyhow, bail};
use comfy_table::Cell;
use console::style;
use serde_json::json;
use taskloom_core::engine::checkpoint::CheckpointError;
use taskloom_core::repository::{BreakpointStore, RecordStore, RunRepository};
use taskloom_infra::sqlite::breakpoint::SqliteBreakpointStore;
use taskloom_types::run::Run;
use taskloom_types::task::{EffectId, TaskIo};
use uuid::Uuid;

use super::output::{
    elapsed, format_time, preview, print_json, run_status_color, run_status_styled, step_status_color, step_status_str,
    table,
};
use crate::state::AppState;

async fn load_run(state: &AppState, run_id: Uuid) -> Result<Run> {
    state
        .runs()
        .get_run(&run_id)
        .await
        .map_err(|e| anyhow!("Failed to load run: {e}"))?
        .ok_or_else(|| anyhow!("Run {run_id} not found"))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn handle_status(
    state: &AppState,
    run_id: Option<Uuid>,
    process: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    match run_id {
        Some(run_id) => show_run(state, run_id, json).await,
        None => list_runs(state, process, limit, json).await,
    }
}

async fn show_run(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    let run = load_run(state, run_id).await?;
    let pending = SqliteBreakpointStore::new(state.db_pool.clone())
        .list_breakpoints(Some(&run_id), true)
        .await
        .map_err(|e| anyhow!("Failed to list breakpoints: {e}"))?;

    if json {
        let mut value = serde_json::to_value(&run)?;
        value["pending_breakpoints"] = json!(pending.iter().map(|bp| &bp.id).collect::<Vec<_>>());
        return print_json(&value);
    }

    println!();
    println!(
        "  Run {} ({} v{})",
        style(run.id).cyan(),
        run.process_name,
        run.process_version
    );
    println!("  Status:    {}", run_status_styled(run.status));
    println!("  Started:   {}", format_time(&run.started_at));
    println!("  Elapsed:   {}", elapsed(&run.started_at, run.completed_at.as_ref()));
    if let Some(step) = &run.failed_step {
        println!("  Failed at: {}", style(step).red());
    }
    if let Some(error) = &run.error {
        println!("  Error:     {}", style(error).red());
    }
    if !run.artifacts.is_empty() {
        println!("  Artifacts:");
        for artifact in &run.artifacts {
            println!("    - {}", artifact.path);
        }
    }
    if let Some(result) = &run.result {
        println!("  Result:    {}", preview(result, 200));
    }
    for bp in &pending {
        println!(
            "  {} waiting on breakpoint {} ({})",
            style("?").yellow().bold(),
            style(&bp.id).cyan(),
            bp.title
        );
    }
    println!();
    Ok(())
}

async fn list_runs(state: &AppState, process: Option<&str>, limit: u32, json: bool) -> Result<()> {
    let runs = state
        .runs()
        .list_runs(process, limit)
        .await
        .map_err(|e| anyhow!("Failed to list runs: {e}"))?;

    if json {
        let out: Vec<_> = runs
            .iter()
            .map(|r| {
                json!({
                    "run_id": r.id.to_string(),
                    "process": r.process_name,
                    "status": r.status.as_str(),
                    "started_at": r.started_at.to_rfc3339(),
                    "completed_at": r.completed_at.map(|t| t.to_rfc3339()),
                    "artifacts": r.artifacts.len(),
                    "error": r.error,
                })
            })
            .collect();
        return print_json(&json!(out));
    }

    if runs.is_empty() {
        println!();
        println!("  No runs yet.");
        println!("  Start one with: {}", style("taskloom run <process.yaml>").dim());
        println!();
        return Ok(());
    }

    let mut table = table(&["Run", "Process", "Status", "Started", "Elapsed", "Artifacts"]);
    for run in &runs {
        table.add_row(vec![
            Cell::new(run.id),
            Cell::new(&run.process_name),
            Cell::new(run.status.as_str()).fg(run_status_color(run.status)),
            Cell::new(format_time(&run.started_at)),
            Cell::new(elapsed(&run.started_at, run.completed_at.as_ref())),
            Cell::new(run.artifacts.len()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

pub async fn handle_logs(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    let run = load_run(state, run_id).await?;
    let logs = state
        .runs()
        .list_step_logs(&run_id)
        .await
        .map_err(|e| anyhow!("Failed to load step logs: {e}"))?;

    if json {
        return print_json(&serde_json::to_value(&logs)?);
    }

    if logs.is_empty() {
        println!();
        println!("  Run {} has no step logs.", run.id);
        println!();
        return Ok(());
    }

    let mut table = table(&["Step", "Type", "Status", "Started", "Elapsed", "Effect", "Detail"]);
    for log in &logs {
        let effect = log
            .output
            .as_ref()
            .and_then(|o| o.get("effect_id"))
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let detail = match (&log.error, &log.output) {
            (Some(error), _) => error.clone(),
            (None, Some(output)) => preview(output.get("output").unwrap_or(output), 60),
            (None, None) => String::new(),
        };
        table.add_row(vec![
            Cell::new(&log.step_id),
            Cell::new(&log.step_type),
            Cell::new(step_status_str(log.status)).fg(step_status_color(log.status)),
            Cell::new(format_time(&log.started_at)),
            Cell::new(elapsed(&log.started_at, log.completed_at.as_ref())),
            Cell::new(effect),
            Cell::new(detail),
        ]);
    }

    println!();
    println!(
        "  {} {} ({})",
        run.process_name,
        style(run.id).dim(),
        run.status.as_str()
    );
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

pub async fn handle_cancel(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    state.checkpoint().request_cancel(run_id).await.map_err(|e| match e {
        CheckpointError::RunNotFound(id) => anyhow!("Run {id} not found"),
        CheckpointError::Finished { status, .. } => anyhow!("Run {run_id} already finished ({status})"),
        other => anyhow!("Failed to cancel run: {other}"),
    })?;

    if json {
        return print_json(&json!({"run_id": run_id.to_string(), "status": "cancelled"}));
    }
    println!();
    println!("  {} Cancelled run {}", style("*").green().bold(), style(run_id).cyan());
    println!("  A process driving it stops before its next step.");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

async fn read_record(state: &AppState, run_id: Uuid, path: &str) -> Result<Option<serde_json::Value>> {
    state
        .records
        .read_record(&run_id, path)
        .await
        .map_err(|e| anyhow!("Failed to read {path}: {e}"))
}

pub async fn handle_record(state: &AppState, run_id: Uuid, effect_id: &str, json: bool) -> Result<()> {
    let io = TaskIo::for_effect(&EffectId::new(effect_id));
    let input = read_record(state, run_id, &io.input_path).await?;
    let output = read_record(state, run_id, &io.output_path).await?;

    if input.is_none() && output.is_none() {
        bail!("No records for effect '{effect_id}' in run {run_id}");
    }

    if json {
        return print_json(&json!({
            "effect_id": effect_id,
            "input": input,
            "output": output,
        }));
    }

    println!();
    println!("  {} {}", style("Input").bold(), style(&io.input_path).dim());
    match &input {
        Some(doc) => println!("{}", serde_json::to_string_pretty(doc)?),
        None => println!("  (none)"),
    }
    println!();
    println!("  {} {}", style("Output").bold(), style(&io.output_path).dim());
    match &output {
        Some(doc) => println!("{}", serde_json::to_string_pretty(doc)?),
        None => println!("  (not completed)"),
    }
    println!();
    Ok(())
}
