//! Breakpoint subcommands: list, show, resolve.
//!
//! Resolving writes the durable store; a run blocked on the breakpoint in
//! another process notices on its next poll, a suspended run continues with
//! `taskloom resume`.

use anyhow::{Context, Result, anyhow, bail};
use clap::Subcommand;
use comfy_table::Cell;
use console::style;
use serde_json::{Value, json};
use taskloom_core::engine::BreakpointError;
use taskloom_core::repository::BreakpointStore;
use taskloom_infra::sqlite::breakpoint::SqliteBreakpointStore;
use taskloom_types::breakpoint::{Breakpoint, Decision};

use super::output::{breakpoint_state_styled, format_time, preview, print_json, table};
use super::parse_run_id;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum BreakpointCommand {
    /// List breakpoints (pending only unless --all).
    #[command(alias = "ls")]
    List {
        /// Only breakpoints of this run.
        #[arg(long)]
        run: Option<String>,

        /// Include resolved breakpoints.
        #[arg(long)]
        all: bool,
    },

    /// Show a breakpoint's question, context and decision.
    Show {
        /// Breakpoint ID (`bp-...`).
        id: String,
    },

    /// Answer a pending breakpoint.
    Resolve {
        /// Breakpoint ID (`bp-...`).
        id: String,

        /// approve, reject or edit.
        decision: Decision,

        /// JSON payload handed to later steps (required for edit).
        #[arg(long)]
        payload: Option<String>,
    },
}

pub async fn handle_breakpoint_command(cmd: BreakpointCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        BreakpointCommand::List { run, all } => handle_list(state, run.as_deref(), all, json).await,
        BreakpointCommand::Show { id } => handle_show(state, &id, json).await,
        BreakpointCommand::Resolve { id, decision, payload } => {
            handle_resolve(state, &id, decision, payload.as_deref(), json).await
        }
    }
}

async fn handle_list(state: &AppState, run: Option<&str>, all: bool, json: bool) -> Result<()> {
    let run_id = run.map(parse_run_id).transpose()?;
    let breakpoints = SqliteBreakpointStore::new(state.db_pool.clone())
        .list_breakpoints(run_id.as_ref(), !all)
        .await
        .map_err(|e| anyhow!("Failed to list breakpoints: {e}"))?;

    if json {
        return print_json(&serde_json::to_value(&breakpoints)?);
    }

    if breakpoints.is_empty() {
        println!();
        println!("  No {}breakpoints.", if all { "" } else { "pending " });
        println!();
        return Ok(());
    }

    let mut table = table(&["ID", "Run", "Step", "Title", "State", "Created"]);
    for bp in &breakpoints {
        table.add_row(vec![
            Cell::new(&bp.id),
            Cell::new(bp.run_id),
            Cell::new(&bp.step_id),
            Cell::new(&bp.title),
            Cell::new(bp.state.as_str()),
            Cell::new(format_time(&bp.created_at)),
        ]);
    }
    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(state: &AppState, id: &str, json: bool) -> Result<()> {
    let bp = state
        .gate()
        .get(id)
        .await
        .map_err(|e| anyhow!("Failed to load breakpoint: {e}"))?
        .ok_or_else(|| anyhow!("Breakpoint '{id}' not found"))?;

    if json {
        return print_json(&serde_json::to_value(&bp)?);
    }
    print_breakpoint(&bp)
}

fn print_breakpoint(bp: &Breakpoint) -> Result<()> {
    println!();
    println!("  {} {}", style(&bp.title).bold(), style(&bp.id).dim());
    println!("  {}", bp.question);
    println!();
    println!("  Run:     {}", bp.run_id);
    println!("  Step:    {}", bp.step_id);
    println!("  State:   {}", breakpoint_state_styled(bp.state));
    println!("  Created: {}", format_time(&bp.created_at));
    if !bp.context.summary.is_null() {
        println!("  Summary:");
        for line in serde_json::to_string_pretty(&bp.context.summary)?.lines() {
            println!("    {line}");
        }
    }
    if !bp.context.files.is_empty() {
        println!("  Files:");
        for file in &bp.context.files {
            println!("    - {}", file.path);
        }
    }
    if let Some(resolution) = &bp.resolution {
        println!("  Decision: {}", resolution.decision);
        if let Some(payload) = &resolution.payload {
            println!("  Payload:  {}", preview(payload, 200));
        }
    }
    println!();
    Ok(())
}

async fn handle_resolve(
    state: &AppState,
    id: &str,
    decision: Decision,
    payload: Option<&str>,
    json: bool,
) -> Result<()> {
    let payload: Option<Value> = payload
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("Invalid --payload JSON")?;
    if decision == Decision::Edit && payload.is_none() {
        bail!("An edit decision needs --payload");
    }

    let resolved = state
        .gate()
        .resolve(id, decision, payload)
        .await
        .map_err(|e| match e {
            BreakpointError::NotFound(id) => anyhow!("Breakpoint '{id}' not found"),
            BreakpointError::AlreadyResolved(id) => anyhow!("Breakpoint '{id}' is already resolved"),
            other => anyhow!("Failed to resolve breakpoint: {other}"),
        })?;

    if json {
        return print_json(&json!({
            "id": resolved.id,
            "run_id": resolved.run_id.to_string(),
            "state": resolved.state.as_str(),
        }));
    }

    println!();
    println!(
        "  {} Breakpoint {} {}",
        style("*").green().bold(),
        style(&resolved.id).cyan(),
        breakpoint_state_styled(resolved.state)
    );
    println!(
        "  If the run is suspended, continue it with: {}",
        style(format!("taskloom resume {} <process>", resolved.run_id)).dim()
    );
    println!();
    Ok(())
}
