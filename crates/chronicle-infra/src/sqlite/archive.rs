//! SQLite archive repository implementation.
//!
//! Implements `ArchiveRepository` from `chronicle-core` using sqlx with split
//! read/write pools. Unassigned messages are streamed from the reader pool so
//! a run never holds a whole server's history in memory.

use async_stream::try_stream;
use futures_util::stream::BoxStream;
use futures_util::{Stream, TryStreamExt};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use chronicle_core::repository::archive::ArchiveRepository;
use chronicle_types::error::RepositoryError;
use chronicle_types::message::ArchivedMessage;
use chronicle_types::scene::{ArchiveStats, SceneSummary, SegmentationRun};

use super::pool::DatabasePool;
use super::row::{
    MessageRow, RunRow, SceneSummaryRow, format_datetime, from_db_id, query_error, to_db_id,
};
use super::scene_store::SqliteSceneStore;

/// SQLite-backed implementation of `ArchiveRepository`.
#[derive(Clone)]
pub struct SqliteArchiveRepository {
    pool: DatabasePool,
}

impl SqliteArchiveRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Stream a server's unassigned messages oldest first, row by row.
fn stream_unassigned(
    reader: SqlitePool,
    server_id: u64,
) -> impl Stream<Item = Result<ArchivedMessage, RepositoryError>> + Send + 'static {
    try_stream! {
        let mut rows = sqlx::query(
            r#"SELECT * FROM archived_messages
               WHERE server_id = ? AND group_id IS NULL
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(to_db_id(server_id))
        .fetch(&reader);

        while let Some(row) = rows.try_next().await.map_err(query_error)? {
            let message = MessageRow::from_row(&row)
                .map_err(query_error)?
                .into_message()?;
            yield message;
        }
    }
}

impl ArchiveRepository for SqliteArchiveRepository {
    type Store = SqliteSceneStore;

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    async fn import_messages(&self, messages: &[ArchivedMessage]) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        let mut inserted = 0u64;

        for message in messages {
            let result = sqlx::query(
                r#"INSERT OR IGNORE INTO archived_messages
                   (id, server_id, author_id, category_id, channel_id, thread_id,
                    created_at, content_length, group_id, is_active)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(to_db_id(message.id))
            .bind(to_db_id(message.server_id))
            .bind(to_db_id(message.author_id))
            .bind(message.location.category_id.map(to_db_id))
            .bind(to_db_id(message.location.channel_id))
            .bind(message.location.thread_id.map(to_db_id))
            .bind(format_datetime(&message.created_at))
            .bind(i64::from(message.content_length))
            .bind(message.group_id.map(to_db_id))
            .bind(message.is_active)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(query_error)?;
        Ok(inserted)
    }

    fn unassigned_messages(
        &self,
        server_id: u64,
    ) -> BoxStream<'static, Result<ArchivedMessage, RepositoryError>> {
        Box::pin(stream_unassigned(self.pool.reader.clone(), server_id))
    }

    async fn servers_with_unassigned(&self) -> Result<Vec<u64>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT DISTINCT server_id FROM archived_messages
               WHERE group_id IS NULL
               ORDER BY server_id ASC"#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("server_id")
                    .map(from_db_id)
                    .map_err(query_error)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Scenes
    // -----------------------------------------------------------------------

    fn scene_store(&self, server_id: u64) -> SqliteSceneStore {
        SqliteSceneStore::new(self.pool.clone(), server_id)
    }

    async fn max_group_id(&self, server_id: u64) -> Result<u64, RepositoryError> {
        // Imported messages may already carry group ids with no scene row.
        let row = sqlx::query(
            r#"SELECT MAX(
                   COALESCE((SELECT MAX(group_id) FROM scene_groups WHERE server_id = ?), 0),
                   COALESCE((SELECT MAX(group_id) FROM archived_messages WHERE server_id = ?), 0)
               ) AS max_group_id"#,
        )
        .bind(to_db_id(server_id))
        .bind(to_db_id(server_id))
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let max: i64 = row.try_get("max_group_id").map_err(query_error)?;
        Ok(from_db_id(max))
    }

    async fn list_groups(&self, server_id: u64) -> Result<Vec<SceneSummary>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT g.group_id, g.server_id, g.category_id, g.channel_id, g.thread_id,
                      g.first_message_id, g.first_message_at,
                      COUNT(m.id) AS message_count,
                      MAX(m.created_at) AS last_message_at
               FROM scene_groups g
               LEFT JOIN archived_messages m
                 ON m.server_id = g.server_id AND m.group_id = g.group_id
               WHERE g.server_id = ?
               GROUP BY g.server_id, g.group_id
               ORDER BY g.group_id ASC"#,
        )
        .bind(to_db_id(server_id))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = SceneSummaryRow::from_row(row).map_err(query_error)?;
            groups.push(r.into_summary()?);
        }
        Ok(groups)
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    async fn record_run(&self, run: &SegmentationRun) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO segmentation_runs
               (id, server_id, status, processed, starting_group_id, final_group_id,
                started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(to_db_id(run.server_id))
        .bind(run.status.to_string())
        .bind(run.processed as i64)
        .bind(to_db_id(run.starting_group_id))
        .bind(to_db_id(run.final_group_id))
        .bind(format_datetime(&run.started_at))
        .bind(format_datetime(&run.finished_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("run {} already recorded", run.id))
            }
            other => query_error(other),
        })?;

        Ok(())
    }

    async fn list_runs(
        &self,
        server_id: Option<u64>,
        limit: u32,
    ) -> Result<Vec<SegmentationRun>, RepositoryError> {
        let server_id = server_id.map(to_db_id);
        let rows = sqlx::query(
            r#"SELECT * FROM segmentation_runs
               WHERE (? IS NULL OR server_id = ?)
               ORDER BY started_at DESC, id DESC
               LIMIT ?"#,
        )
        .bind(server_id)
        .bind(server_id)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunRow::from_row(row).map_err(query_error)?;
            runs.push(r.into_run()?);
        }
        Ok(runs)
    }

    async fn archive_stats(&self) -> Result<ArchiveStats, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT
                   (SELECT COUNT(*) FROM archived_messages) AS message_count,
                   (SELECT COUNT(*) FROM archived_messages WHERE group_id IS NULL) AS unassigned_count,
                   (SELECT COUNT(*) FROM scene_groups) AS group_count,
                   (SELECT COUNT(DISTINCT server_id) FROM archived_messages) AS server_count,
                   (SELECT COUNT(*) FROM segmentation_runs) AS run_count"#,
        )
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let count = |name: &str| -> Result<u64, RepositoryError> {
            row.try_get::<i64, _>(name)
                .map(|n| n.max(0) as u64)
                .map_err(query_error)
        };

        Ok(ArchiveStats {
            messages: count("message_count")?,
            unassigned: count("unassigned_count")?,
            groups: count("group_count")?,
            servers: count("server_count")?,
            runs: count("run_count")?,
        })
    }
}
