//! Waypoint CLI entry point.
//!
//! Binary name: `waypoint`
//!
//! Parses CLI arguments, loads configuration, the tool registry and the
//! workflow catalog, opens the checkpoint store, then dispatches to the
//! command handler. The process exit code reports the outcome class.

mod cli;
mod exit;
mod state;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap_complete::generate;
use console::{style, Term};

use cli::progress::StepProgress;
use cli::{Cli, Commands};
use exit::{classify, ExitClass};
use state::{AppState, StateOptions};
use waypoint_core::workflow::runner::RunObserver;
use waypoint_observe::tracing_setup::{LogSettings, init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,waypoint=debug",
        _ => "trace",
    };
    if let Err(e) = init_tracing(&LogSettings::from_env(filter)) {
        eprintln!("failed to initialize logging: {e}");
    }

    let json = cli.json;
    let result = run(cli).await;
    shutdown_tracing();

    match result {
        Ok(()) => ExitClass::Success.into(),
        Err(err) => {
            let class = classify(&err);
            if json {
                let out = serde_json::json!({
                    "error": format!("{err:#}"),
                    "exit_code": class.code(),
                });
                eprintln!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
            } else {
                eprintln!();
                eprintln!("  {} {err:#}", style("error:").red().bold());
                eprintln!();
            }
            class.into()
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions and schemas don't need app state
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(*shell, &mut cmd, "waypoint", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Schema { kind } => return cli::catalog::print_schema(*kind),
        _ => {}
    }

    let progress = (!cli.json && !cli.quiet && Term::stderr().is_term())
        .then(|| Arc::new(StepProgress::new()));
    let observer = progress.clone().map(|p| p as Arc<dyn RunObserver>);

    let opts = StateOptions {
        data_dir: cli.data_dir.clone(),
        config: cli.config.clone(),
    };
    let state = AppState::init(opts, observer).await?;

    let result = match cli.command {
        Commands::Start {
            workflow,
            params,
            params_json,
        } => {
            cli::workflow::handle_start(
                &workflow,
                &params,
                params_json.as_deref(),
                &state,
                cli.json,
                cli.quiet,
            )
            .await
        }
        Commands::Status { target } => {
            cli::workflow::handle_status(target.as_deref(), &state, cli.json).await
        }
        Commands::Resume { instance, yes } => {
            cli::workflow::handle_resume(&instance, yes, &state, cli.json, cli.quiet).await
        }
        Commands::Cancel { instance, now } => {
            cli::workflow::handle_cancel(&instance, now, &state, cli.json).await
        }
        Commands::Recover => cli::workflow::handle_recover(&state, cli.json, cli.quiet).await,
        Commands::Tools => cli::catalog::list_tools(&state, cli.json),
        Commands::Workflows => cli::catalog::list_workflows(&state, cli.json),
        Commands::Schema { .. } | Commands::Completions { .. } => Ok(()),
    };

    if let Some(progress) = progress {
        progress.finish();
    }
    result
}
