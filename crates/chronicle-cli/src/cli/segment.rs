//! `chron segment`: run scene segmentation over one server or all of them.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use chronicle_core::repository::archive::ArchiveRepository;
use chronicle_types::config::SegmentationConfig;
use chronicle_types::error::SegmentationError;
use chronicle_types::scene::{RunStatus, SegmentationProgress, SegmentationRun};

use super::SegmentArgs;
use crate::state::AppState;

type RunResult = (u64, Result<SegmentationRun, SegmentationError>);

/// Segment the selected server(s) and print one summary line per run.
pub async fn segment(
    state: &AppState,
    args: &SegmentArgs,
    cancel: CancellationToken,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let config = args.apply(state.config.segmentation.clone());
    config
        .validate()
        .map_err(|reason| anyhow::anyhow!("invalid segmentation settings: {reason}"))?;

    let results = match args.server {
        Some(server_id) if !args.all => {
            vec![segment_one(state, server_id, &config, cancel, json || quiet).await?]
        }
        _ => segment_all(state, &config, &cancel, json || quiet).await?,
    };

    if json {
        print_json(&results)?;
    } else if !quiet {
        print_summary(&results);
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        anyhow::bail!("{failed} segmentation run(s) failed");
    }
    Ok(())
}

/// One server, with a spinner fed from the engine's progress channel.
async fn segment_one(
    state: &AppState,
    server_id: u64,
    config: &SegmentationConfig,
    cancel: CancellationToken,
    hidden: bool,
) -> Result<RunResult> {
    let spinner = new_spinner(hidden)?;
    spinner.set_message(format!("Segmenting server {server_id}..."));

    let (tx, rx) = watch::channel(SegmentationProgress {
        server_id,
        ..SegmentationProgress::default()
    });
    let reporter = spawn_progress_reporter(spinner.clone(), rx);

    let result = state
        .segmentation_service
        .segment_server(server_id, config, cancel, Some(tx))
        .await;

    join_reporter(reporter).await;
    spinner.finish_and_clear();

    Ok((server_id, result))
}

/// Mirror progress snapshots onto the spinner. Ends when the sender is dropped.
fn spawn_progress_reporter(
    spinner: ProgressBar,
    mut rx: watch::Receiver<SegmentationProgress>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let progress = *rx.borrow_and_update();
            spinner.set_message(progress_message(&progress));
        }
    })
}

/// Wait for the reporter. A reporter failure never fails the run.
async fn join_reporter(reporter: JoinHandle<()>) {
    if let Err(e) = reporter.await {
        tracing::warn!("progress reporter task failed: {e}");
    }
}

/// Every server with unassigned messages, concurrently.
async fn segment_all(
    state: &AppState,
    config: &SegmentationConfig,
    cancel: &CancellationToken,
    hidden: bool,
) -> Result<Vec<RunResult>> {
    let server_ids = state.archive().servers_with_unassigned().await?;
    if server_ids.is_empty() {
        tracing::info!("no server has unassigned messages");
        return Ok(Vec::new());
    }

    let spinner = new_spinner(hidden)?;
    spinner.set_message(format!("Segmenting {} servers...", server_ids.len()));

    let results = state
        .segmentation_service
        .segment_servers(&server_ids, config, cancel)
        .await;

    spinner.finish_and_clear();
    Ok(results)
}

fn new_spinner(hidden: bool) -> Result<ProgressBar> {
    let spinner = if hidden {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    Ok(spinner)
}

fn progress_message(progress: &SegmentationProgress) -> String {
    format!(
        "Server {}: {} messages, group {}, {} waiting",
        progress.server_id, progress.processed, progress.group_id, progress.backlog_len
    )
}

fn print_json(results: &[RunResult]) -> Result<()> {
    let runs: Vec<serde_json::Value> = results
        .iter()
        .map(|(server_id, result)| match result {
            Ok(run) => serde_json::json!({
                "server_id": server_id,
                "run": run,
            }),
            Err(e) => serde_json::json!({
                "server_id": server_id,
                "error": e.to_string(),
            }),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&runs)?);
    Ok(())
}

fn print_summary(results: &[RunResult]) {
    if results.is_empty() {
        println!();
        println!("  {}", style("Nothing to segment.").dim());
        println!();
        return;
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Server").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Processed").fg(Color::White),
        Cell::new("Groups").fg(Color::White),
        Cell::new("Last Group").fg(Color::White),
    ]);

    for (server_id, result) in results {
        match result {
            Ok(run) => {
                table.add_row(vec![
                    Cell::new(server_id).fg(Color::Cyan),
                    status_cell(run.status),
                    Cell::new(run.processed),
                    Cell::new(run.groups_opened()),
                    Cell::new(run.final_group_id).fg(Color::DarkGrey),
                ]);
            }
            Err(e) => {
                table.add_row(vec![
                    Cell::new(server_id).fg(Color::Cyan),
                    Cell::new("failed").fg(Color::Red),
                    Cell::new(e.to_string()).fg(Color::Red),
                    Cell::new("-"),
                    Cell::new("-"),
                ]);
            }
        }
    }

    println!();
    println!("{table}");

    let interrupted = results
        .iter()
        .any(|(_, r)| matches!(r, Ok(run) if run.status != RunStatus::Completed));
    if interrupted {
        println!(
            "  {} Unassigned messages remain; run `chron segment` again to continue.",
            style("!").yellow().bold()
        );
    }
    println!();
}

fn status_cell(status: RunStatus) -> Cell {
    let color = match status {
        RunStatus::Completed => Color::Green,
        RunStatus::GroupLimitReached => Color::Yellow,
        RunStatus::Cancelled => Color::DarkGrey,
    };
    Cell::new(status.to_string()).fg(color)
}
