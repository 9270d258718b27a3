//! CLI command definitions for the `taskloom` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are grouped by
//! what they act on: process files (`run`, `resume`, `validate`), stored
//! runs (`status`, `logs`, `cancel`, `record`) and breakpoints.

pub mod breakpoint;
pub mod output;
pub mod process;
pub mod runs;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Durable multi-phase processes driven by external agents.
#[derive(Parser)]
#[command(name = "taskloom", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new run of a process definition.
    Run {
        /// Process definition file (YAML or JSON).
        process: PathBuf,

        /// Run inputs as a JSON object.
        #[arg(long, default_value = "{}")]
        inputs: String,

        /// Directory of task templates (default: `tasks/` next to the process file).
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Stop at the first unresolved breakpoint instead of waiting for it.
        #[arg(long)]
        suspend: bool,
    },

    /// Continue a suspended or interrupted run.
    Resume {
        /// Run UUID.
        run_id: String,

        /// Process definition file the run was started from.
        process: PathBuf,

        /// Directory of task templates (default: `tasks/` next to the process file).
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Stop at the next unresolved breakpoint instead of waiting for it.
        #[arg(long)]
        suspend: bool,
    },

    /// Check a process definition and its task templates without running it.
    Validate {
        process: PathBuf,

        #[arg(long)]
        tasks: Option<PathBuf>,
    },

    /// Show one run, or the most recent runs.
    Status {
        /// Run UUID (omit to list recent runs).
        run_id: Option<String>,

        /// Only runs of this process.
        #[arg(long)]
        process: Option<String>,

        /// Maximum number of runs to list.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show step logs for a run.
    Logs {
        /// Run UUID.
        run_id: String,
    },

    /// Cancel a run that has not finished.
    Cancel {
        /// Run UUID.
        run_id: String,
    },

    /// Inspect and answer breakpoints.
    #[command(alias = "bp")]
    Breakpoint {
        #[command(subcommand)]
        action: breakpoint::BreakpointCommand,
    },

    /// Print the input and output records of one task execution.
    Record {
        /// Run UUID.
        run_id: String,

        /// Effect ID (see `taskloom logs`).
        effect_id: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Parse a run ID argument.
pub fn parse_run_id(raw: &str) -> anyhow::Result<uuid::Uuid> {
    raw.parse::<uuid::Uuid>()
        .map_err(|_| anyhow::anyhow!("Invalid run ID '{raw}' (expected a UUID)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "taskloom",
            "--json",
            "run",
            "p.yaml",
            "--inputs",
            r#"{"topic":"x"}"#,
            "--suspend",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run { process, inputs, suspend, tasks } => {
                assert_eq!(process, PathBuf::from("p.yaml"));
                assert_eq!(inputs, r#"{"topic":"x"}"#);
                assert!(suspend);
                assert!(tasks.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_breakpoint_resolve() {
        let cli = Cli::try_parse_from([
            "taskloom",
            "bp",
            "resolve",
            "bp-0011",
            "edit",
            "--payload",
            r#"{"v":2}"#,
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Breakpoint {
                action: breakpoint::BreakpointCommand::Resolve { .. }
            }
        ));
    }

    #[test]
    fn test_parse_run_id() {
        assert!(parse_run_id("not-a-uuid").is_err());
        let id = uuid::Uuid::now_v7();
        assert_eq!(parse_run_id(&id.to_string()).unwrap(), id);
    }
}
