//! taskloom CLI entry point.
//!
//! Parses arguments, installs tracing, opens the data directory and
//! dispatches to the command handlers.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use taskloom_observe::{LogFormat, TracingOptions, default_filter, init_tracing, shutdown_tracing};

use cli::{Cli, Commands, parse_run_id};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let tracing_options = TracingOptions {
        filter: Some(default_filter(cli.verbose, cli.quiet).to_string()),
        format: LogFormat::Text,
        otel: cli.otel,
    };
    if let Err(e) = init_tracing(&tracing_options) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Shell completions and validation don't need app state
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(*shell, &mut cmd, "taskloom", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Validate { process, tasks } => {
            return cli::process::handle_validate(process, tasks.as_deref(), cli.json);
        }
        _ => {}
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Run {
            process,
            inputs,
            tasks,
            suspend,
        } => {
            cli::process::handle_run(
                &state,
                &process,
                &inputs,
                tasks.as_deref(),
                suspend,
                cli.json,
                cli.quiet,
            )
            .await?;
        }

        Commands::Resume {
            run_id,
            process,
            tasks,
            suspend,
        } => {
            let run_id = parse_run_id(&run_id)?;
            cli::process::handle_resume(
                &state,
                run_id,
                &process,
                tasks.as_deref(),
                suspend,
                cli.json,
                cli.quiet,
            )
            .await?;
        }

        Commands::Status {
            run_id,
            process,
            limit,
        } => {
            let run_id = run_id.as_deref().map(parse_run_id).transpose()?;
            cli::runs::handle_status(&state, run_id, process.as_deref(), limit, cli.json).await?;
        }

        Commands::Logs { run_id } => {
            cli::runs::handle_logs(&state, parse_run_id(&run_id)?, cli.json).await?;
        }

        Commands::Cancel { run_id } => {
            cli::runs::handle_cancel(&state, parse_run_id(&run_id)?, cli.json).await?;
        }

        Commands::Breakpoint { action } => {
            cli::breakpoint::handle_breakpoint_command(action, &state, cli.json).await?;
        }

        Commands::Record { run_id, effect_id } => {
            cli::runs::handle_record(&state, parse_run_id(&run_id)?, &effect_id, cli.json).await?;
        }

        Commands::Completions { .. } | Commands::Validate { .. } => {}
    }

    Ok(())
}
