//! `chron groups`: list a server's scenes.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use chronicle_core::repository::archive::ArchiveRepository;

use crate::state::AppState;

/// Print every scene of `server_id`, oldest first.
pub async fn list_groups(state: &AppState, server_id: u64, json: bool) -> Result<()> {
    let groups = state.archive().list_groups(server_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!();
        println!(
            "  No scenes for server {}. Run {} first.",
            style(server_id).cyan(),
            style(format!("chron segment --server {server_id}")).bold()
        );
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  Scenes for server {} ({} total)",
        style(server_id).cyan(),
        groups.len()
    );
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Group").fg(Color::White),
        Cell::new("Location").fg(Color::White),
        Cell::new("Messages").fg(Color::White),
        Cell::new("Started").fg(Color::White),
        Cell::new("Last Message").fg(Color::White),
    ]);

    for summary in &groups {
        let last = summary
            .last_message_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(summary.group.id).fg(Color::Cyan),
            Cell::new(summary.group.location.to_string()),
            Cell::new(summary.message_count),
            Cell::new(summary.group.first_message_at.format("%Y-%m-%d %H:%M").to_string())
                .fg(Color::DarkGrey),
            Cell::new(last).fg(Color::DarkGrey),
        ]);
    }

    println!("{table}");
    println!();

    Ok(())
}
