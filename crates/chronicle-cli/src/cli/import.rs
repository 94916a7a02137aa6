//! `chron import`: load archived messages from a JSON Lines file.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};

use chronicle_core::repository::archive::ArchiveRepository;
use chronicle_types::message::ArchivedMessage;

use crate::state::AppState;

/// Messages inserted per transaction.
const IMPORT_BATCH: usize = 1_000;

/// Import every message in `path`, skipping ids already in the archive.
pub async fn import_file(state: &AppState, path: &Path, json: bool, quiet: bool) -> Result<()> {
    let messages = read_messages(path).await?;

    let spinner = if json || quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let mut inserted = 0u64;
    for (index, batch) in messages.chunks(IMPORT_BATCH).enumerate() {
        spinner.set_message(format!(
            "Importing {}/{} messages...",
            index * IMPORT_BATCH + batch.len(),
            messages.len()
        ));
        inserted += state.archive().import_messages(batch).await?;
    }
    spinner.finish_and_clear();

    let skipped = messages.len() as u64 - inserted;
    tracing::info!(file = %path.display(), inserted, skipped, "import finished");

    if json {
        let summary = serde_json::json!({
            "file": path.display().to_string(),
            "read": messages.len(),
            "inserted": inserted,
            "skipped": skipped,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !quiet {
        println!(
            "  {} Imported {} messages from {}",
            style("✓").green().bold(),
            style(inserted).bold(),
            style(path.display()).cyan()
        );
        if skipped > 0 {
            println!("  {} already archived, skipped", style(skipped).dim());
        }
    }

    Ok(())
}

/// Parse a JSON Lines file into messages. Blank lines are ignored.
pub async fn read_messages(path: &Path) -> Result<Vec<ArchivedMessage>> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut messages = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: ArchivedMessage = serde_json::from_str(line)
            .with_context(|| format!("{}:{line_no}: invalid message", path.display()))?;
        messages.push(message);
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_messages_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.jsonl");
        tokio::fs::write(
            &path,
            concat!(
                r#"{"id":1,"server_id":9,"author_id":3,"location":{"channel_id":5},"created_at":"2024-01-01T00:00:00Z"}"#,
                "\n\n",
                r#"{"id":2,"server_id":9,"author_id":4,"location":{"category_id":1,"channel_id":5,"thread_id":8},"created_at":"2024-01-01T00:01:00Z","content_length":12}"#,
                "\n",
            ),
        )
        .await
        .unwrap();

        let messages = read_messages(&path).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, 1);
        assert!(messages[0].is_active);
        assert_eq!(messages[0].group_id, None);
        assert_eq!(messages[1].location.thread_id, Some(8));
        assert_eq!(messages[1].content_length, 12);
    }

    #[tokio::test]
    async fn test_read_messages_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jsonl");
        tokio::fs::write(
            &path,
            "{\"id\":1,\"server_id\":9,\"author_id\":3,\"location\":{\"channel_id\":5},\"created_at\":\"2024-01-01T00:00:00Z\"}\nnot json\n",
        )
        .await
        .unwrap();

        let err = read_messages(&path).await.unwrap_err();
        assert!(err.to_string().contains(":2: invalid message"), "{err}");
    }

    #[tokio::test]
    async fn test_read_messages_missing_file() {
        let err = read_messages(Path::new("/nonexistent/chronicle.jsonl"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to open"));
    }
}
