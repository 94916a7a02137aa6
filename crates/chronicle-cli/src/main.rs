//! Chronicle CLI entry point.
//!
//! Binary name: `chron`
//!
//! Parses CLI arguments, initializes tracing, the database and the
//! segmentation service, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;

use chronicle_observe::tracing_setup::{default_filter, init_tracing, shutdown_tracing};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(default_filter(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "chron", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Import { file } => {
            cli::import::import_file(&state, &file, cli.json, cli.quiet).await?;
        }

        Commands::Segment(args) => {
            // Ctrl+C stops the run at its next cancellation check.
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, stopping segmentation");
                    on_interrupt.cancel();
                }
            });

            cli::segment::segment(&state, &args, cancel, cli.json, cli.quiet).await?;
        }

        Commands::Groups { server } => {
            cli::groups::list_groups(&state, server, cli.json).await?;
        }

        Commands::Status { runs } => {
            cli::status::status(&state, runs, cli.json).await?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
