//! SQLite scene store: the segmentation engine's registry and commit sink.
//!
//! Scene registrations and message assignments are buffered in memory and
//! written in a single transaction on `commit`. A store dropped with
//! uncommitted writes discards them, which leaves those messages unassigned
//! for the next run.

use std::collections::HashSet;

use tracing::debug;

use chronicle_core::repository::scene::{GroupRegistry, PersistenceSink};
use chronicle_types::error::RepositoryError;
use chronicle_types::message::ArchivedMessage;
use chronicle_types::scene::SceneGroup;
use chrono::Utc;

use super::pool::DatabasePool;
use super::row::{format_datetime, query_error, to_db_id};

/// Per-run scene store for one server.
pub struct SqliteSceneStore {
    pool: DatabasePool,
    server_id: u64,
    /// Group ids this store has already registered, committed or not.
    registered: HashSet<u64>,
    pending_groups: Vec<SceneGroup>,
    /// `(message_id, group_id)` pairs awaiting commit.
    pending_assignments: Vec<(u64, u64)>,
}

impl SqliteSceneStore {
    pub fn new(pool: DatabasePool, server_id: u64) -> Self {
        Self {
            pool,
            server_id,
            registered: HashSet::new(),
            pending_groups: Vec::new(),
            pending_assignments: Vec::new(),
        }
    }

    /// Number of buffered writes not yet committed.
    pub fn pending(&self) -> usize {
        self.pending_groups.len() + self.pending_assignments.len()
    }
}

impl GroupRegistry for SqliteSceneStore {
    async fn ensure_group(&mut self, group: &SceneGroup) -> Result<(), RepositoryError> {
        if group.server_id != self.server_id {
            return Err(RepositoryError::Conflict(format!(
                "group {} belongs to server {}, store is for server {}",
                group.id, group.server_id, self.server_id
            )));
        }
        if self.registered.insert(group.id) {
            self.pending_groups.push(group.clone());
        }
        Ok(())
    }

    async fn assign_group(&mut self, message: &ArchivedMessage) -> Result<(), RepositoryError> {
        let group_id = message.group_id.ok_or_else(|| {
            RepositoryError::Conflict(format!("message {} has no group id", message.id))
        })?;
        self.pending_assignments.push((message.id, group_id));
        Ok(())
    }
}

impl PersistenceSink for SqliteSceneStore {
    async fn commit(&mut self) -> Result<(), RepositoryError> {
        if self.pending() == 0 {
            return Ok(());
        }

        let registered_at = format_datetime(&Utc::now());
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        for group in &self.pending_groups {
            sqlx::query(
                r#"INSERT OR IGNORE INTO scene_groups
                   (server_id, group_id, category_id, channel_id, thread_id,
                    first_message_id, first_message_at, registered_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(to_db_id(group.server_id))
            .bind(to_db_id(group.id))
            .bind(group.location.category_id.map(to_db_id))
            .bind(to_db_id(group.location.channel_id))
            .bind(group.location.thread_id.map(to_db_id))
            .bind(to_db_id(group.first_message_id))
            .bind(format_datetime(&group.first_message_at))
            .bind(&registered_at)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        for &(message_id, group_id) in &self.pending_assignments {
            sqlx::query(
                r#"UPDATE archived_messages
                   SET group_id = ?, is_active = 0
                   WHERE id = ? AND server_id = ?"#,
            )
            .bind(to_db_id(group_id))
            .bind(to_db_id(message_id))
            .bind(to_db_id(self.server_id))
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        tx.commit().await.map_err(query_error)?;

        debug!(
            server_id = self.server_id,
            groups = self.pending_groups.len(),
            assignments = self.pending_assignments.len(),
            "scene store committed"
        );
        self.pending_groups.clear();
        self.pending_assignments.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::archive::SqliteArchiveRepository;
    use crate::sqlite::pool::database_url;
    use chronicle_core::repository::archive::ArchiveRepository;
    use chronicle_core::segment::SegmentationEngine;
    use chronicle_core::service::segmentation::SegmentationService;
    use chronicle_types::config::SegmentationConfig;
    use chronicle_types::message::LocationKey;
    use chronicle_types::scene::{RunStatus, SegmentationOutcome};
    use crate::sqlite::pool::READER_MAX_CONNECTIONS;
    use chrono::{DateTime, Duration, TimeZone};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn test_repo() -> (SqliteArchiveRepository, DatabasePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url(dir.path())).await.unwrap();
        // Keep the tempdir alive for the duration of the test
        std::mem::forget(dir);
        (SqliteArchiveRepository::new(pool.clone()), pool)
    }

    fn at_minute(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn message(id: u64, author_id: u64, channel_id: u64, minute: i64) -> ArchivedMessage {
        ArchivedMessage {
            id,
            server_id: 1,
            author_id,
            location: LocationKey::channel(channel_id),
            created_at: at_minute(minute),
            content_length: 0,
            group_id: None,
            is_active: true,
        }
    }

    fn group(id: u64, first: &ArchivedMessage) -> SceneGroup {
        SceneGroup {
            id,
            server_id: 1,
            location: first.location.clone(),
            first_message_id: first.id,
            first_message_at: first.created_at,
        }
    }

    /// Committed group id of a message.
    async fn group_of(pool: &DatabasePool, message_id: u64) -> Option<u64> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT group_id FROM archived_messages WHERE id = ?")
                .bind(message_id as i64)
                .fetch_one(&pool.reader)
                .await
                .unwrap();
        row.0.map(|g| g as u64)
    }

    #[tokio::test]
    async fn test_commit_writes_groups_and_assignments() {
        let (repo, pool) = test_repo().await;
        let mut first = message(1, 10, 1, 0);
        repo.import_messages(std::slice::from_ref(&first)).await.unwrap();

        let mut store = repo.scene_store(1);
        store.ensure_group(&group(1, &first)).await.unwrap();
        first.group_id = Some(1);
        store.assign_group(&first).await.unwrap();
        assert_eq!(store.pending(), 2);

        store.commit().await.unwrap();
        assert_eq!(store.pending(), 0);

        assert_eq!(group_of(&pool, 1).await, Some(1));
        let active: (bool,) = sqlx::query_as("SELECT is_active FROM archived_messages WHERE id = 1")
            .fetch_one(&pool.reader)
            .await
            .unwrap();
        assert!(!active.0);
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded_on_drop() {
        let (repo, pool) = test_repo().await;
        let mut first = message(1, 10, 1, 0);
        repo.import_messages(std::slice::from_ref(&first)).await.unwrap();

        {
            let mut store = repo.scene_store(1);
            store.ensure_group(&group(1, &first)).await.unwrap();
            first.group_id = Some(1);
            store.assign_group(&first).await.unwrap();
        }

        assert_eq!(group_of(&pool, 1).await, None);
        assert!(repo.list_groups(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_group_registers_once() {
        let (repo, _pool) = test_repo().await;
        let first = message(1, 10, 1, 0);
        repo.import_messages(std::slice::from_ref(&first)).await.unwrap();
        let mut store = repo.scene_store(1);

        store.ensure_group(&group(1, &first)).await.unwrap();
        store.ensure_group(&group(1, &first)).await.unwrap();
        assert_eq!(store.pending(), 1);

        store.commit().await.unwrap();
        store.ensure_group(&group(1, &first)).await.unwrap();
        assert_eq!(store.pending(), 0);
    }

    #[tokio::test]
    async fn test_commit_rejects_scene_without_archived_first_message() {
        let (repo, pool) = test_repo().await;
        let archived = message(1, 10, 1, 0);
        repo.import_messages(std::slice::from_ref(&archived)).await.unwrap();
        let missing = message(2, 11, 1, 1);

        let mut store = repo.scene_store(1);
        store.ensure_group(&group(1, &missing)).await.unwrap();
        let mut assigned = archived.clone();
        assigned.group_id = Some(1);
        store.assign_group(&assigned).await.unwrap();

        let err = store.commit().await.unwrap_err();
        assert!(matches!(err, RepositoryError::Query(_)));
        // The transaction rolled back and the writes stay buffered.
        assert_eq!(store.pending(), 2);
        assert_eq!(group_of(&pool, 1).await, None);
        assert!(repo.list_groups(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_rejects_other_server_and_unassigned_message() {
        let (repo, _pool) = test_repo().await;
        let first = message(1, 10, 1, 0);
        let mut store = repo.scene_store(2);

        let err = store.ensure_group(&group(1, &first)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let err = store.assign_group(&first).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_engine_end_to_end_on_sqlite() {
        let (repo, pool) = test_repo().await;
        // Channel 1 scene, a deferred message in channel 2, then a quiet
        // stretch long enough to force a split.
        repo.import_messages(&[
            message(1, 10, 1, 0),
            message(2, 11, 1, 1),
            message(3, 12, 2, 2),
            message(4, 10, 1, 3),
            message(5, 13, 3, 300),
        ])
        .await
        .unwrap();

        let mut store = repo.scene_store(1);
        let outcome = SegmentationEngine::new(1, SegmentationConfig::default(), &mut store)
            .unwrap()
            .run(repo.unassigned_messages(1))
            .await
            .unwrap();

        assert!(matches!(outcome, SegmentationOutcome::Completed { processed: 5, .. }));
        assert_eq!(group_of(&pool, 1).await, Some(1));
        assert_eq!(group_of(&pool, 2).await, Some(1));
        assert_eq!(group_of(&pool, 4).await, Some(1));
        assert_eq!(group_of(&pool, 3).await, Some(2));
        assert_eq!(group_of(&pool, 5).await, Some(3));
        assert_eq!(repo.archive_stats().await.unwrap().unassigned, 0);
    }

    #[tokio::test]
    async fn test_service_resumes_after_previous_run() {
        let (repo, pool) = test_repo().await;
        let service = SegmentationService::new(repo.clone());
        let config = SegmentationConfig::default();

        repo.import_messages(&[message(1, 10, 1, 0), message(2, 11, 2, 1)])
            .await
            .unwrap();
        let first = service
            .segment_server(1, &config, CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(first.status, RunStatus::Completed);
        assert_eq!(first.starting_group_id, 0);
        assert_eq!(first.final_group_id, 2);

        repo.import_messages(&[message(3, 12, 1, 600)]).await.unwrap();
        let second = service
            .segment_server(1, &config, CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(second.starting_group_id, 2);
        assert_eq!(second.processed, 1);
        assert_eq!(group_of(&pool, 3).await, Some(3));

        let runs = repo.list_runs(Some(1), 10).await.unwrap();
        assert_eq!(runs.len(), 2);
    }

    #[tokio::test]
    async fn test_more_servers_than_reader_connections() {
        let (repo, pool) = test_repo().await;
        let servers: Vec<u64> = (1..=READER_MAX_CONNECTIONS as u64 + 4).collect();
        let messages: Vec<ArchivedMessage> = servers
            .iter()
            .flat_map(|&server_id| {
                [message(1, 10, 1, 0), message(2, 11, 2, 1)]
                    .into_iter()
                    .map(move |mut m| {
                        m.server_id = server_id;
                        m.id += server_id * 100;
                        m
                    })
            })
            .collect();
        repo.import_messages(&messages).await.unwrap();

        let service = Arc::new(
            SegmentationService::new(repo.clone())
                .with_max_concurrent_runs(READER_MAX_CONNECTIONS as usize / 2),
        );
        let results = service
            .segment_servers(&servers, &SegmentationConfig::default(), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), servers.len());
        for (server_id, result) in results {
            let run = result.unwrap_or_else(|e| panic!("server {server_id} failed: {e}"));
            assert_eq!(run.status, RunStatus::Completed);
            assert_eq!(run.processed, 2);
            assert_eq!(run.final_group_id, 2);
        }
        assert_eq!(repo.archive_stats().await.unwrap().unassigned, 0);
        assert_eq!(group_of(&pool, 1201).await, Some(1));
        assert_eq!(group_of(&pool, 1202).await, Some(2));
    }
}
