//! Archive status dashboard command.

use anyhow::Result;
use console::style;

use chronicle_core::repository::archive::ArchiveRepository;
use chronicle_types::scene::{RunStatus, SegmentationRun};

use crate::state::AppState;

/// Display archive statistics and the most recent segmentation runs.
pub async fn status(state: &AppState, recent: u32, json: bool) -> Result<()> {
    let archive = state.archive();
    let stats = archive.archive_stats().await?;
    let runs = archive.list_runs(None, recent).await?;

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "archive": stats,
            "recent_runs": runs,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {} Chronicle v{}", style("◆").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Archive ──").dim());
    println!("  Servers:    {}", style(stats.servers).bold());
    println!("  Messages:   {}", style(stats.messages).bold());
    if stats.unassigned > 0 {
        println!("  Unassigned: {}", style(stats.unassigned).yellow());
    } else {
        println!("  Unassigned: {}", style(0).green());
    }
    println!("  Scenes:     {}", style(stats.groups).bold());
    println!();

    println!("  {}", style("── Recent runs ──").dim());
    if runs.is_empty() {
        println!("  {}", style("none yet").dim());
    }
    for run in &runs {
        println!("  {}", format_run(run));
    }
    println!("  Total: {}", stats.runs);
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}

fn format_run(run: &SegmentationRun) -> String {
    let status = match run.status {
        RunStatus::Completed => style(run.status.to_string()).green(),
        RunStatus::GroupLimitReached => style(run.status.to_string()).yellow(),
        RunStatus::Cancelled => style(run.status.to_string()).dim(),
    };
    format!(
        "{} server {} {} ({} messages, +{} scenes)",
        style(run.finished_at.format("%Y-%m-%d %H:%M")).dim(),
        run.server_id,
        status,
        run.processed,
        run.groups_opened()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn test_format_run_mentions_counts() {
        console::set_colors_enabled(false);
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let run = SegmentationRun {
            id: Uuid::now_v7(),
            server_id: 3,
            status: RunStatus::GroupLimitReached,
            processed: 40,
            starting_group_id: 10,
            final_group_id: 14,
            started_at: at,
            finished_at: at,
        };

        assert_eq!(
            format_run(&run),
            "2024-03-01 12:30 server 3 group_limit_reached (40 messages, +4 scenes)"
        );
    }
}
