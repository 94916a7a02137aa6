//! Segmentation service.
//!
//! Wires an [`ArchiveRepository`] to the [`SegmentationEngine`]: resumes group
//! numbering from the last committed scene, streams the server's unassigned
//! messages through the engine, and records an audit row for the run.
//! Several servers can be segmented concurrently; each run gets its own
//! engine state and its own scene store. At most `max_concurrent_runs` runs
//! are in flight at once, since each one holds a reader connection for its
//! whole message stream.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use chronicle_types::config::SegmentationConfig;
use chronicle_types::error::SegmentationError;
use chronicle_types::scene::{SegmentationProgress, SegmentationRun};

use crate::repository::archive::ArchiveRepository;
use crate::segment::SegmentationEngine;

/// Runs in flight at once in [`SegmentationService::segment_servers`] unless
/// overridden.
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 4;

/// Service running scene segmentation over archived servers.
///
/// Generic over the archive repository to maintain clean architecture --
/// chronicle-core never depends on chronicle-infra.
pub struct SegmentationService<A: ArchiveRepository> {
    archive: A,
    max_concurrent_runs: usize,
}

impl<A: ArchiveRepository> SegmentationService<A> {
    pub fn new(archive: A) -> Self {
        Self {
            archive,
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
        }
    }

    /// Cap the number of concurrent runs in `segment_servers`. Clamped to at
    /// least one.
    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max.max(1);
        self
    }

    pub fn max_concurrent_runs(&self) -> usize {
        self.max_concurrent_runs
    }

    /// Access the underlying repository.
    pub fn archive(&self) -> &A {
        &self.archive
    }

    /// Segment every unassigned message of one server.
    ///
    /// 1. Validates the config
    /// 2. Resumes numbering after the server's highest committed group id
    /// 3. Streams unassigned messages (oldest first) through the engine
    /// 4. Records the run for audit and returns it
    pub async fn segment_server(
        &self,
        server_id: u64,
        config: &SegmentationConfig,
        cancel: CancellationToken,
        progress: Option<watch::Sender<SegmentationProgress>>,
    ) -> Result<SegmentationRun, SegmentationError> {
        config.validate().map_err(SegmentationError::InvalidConfig)?;

        let run_id = Uuid::now_v7();
        let span = info_span!("segment_server", server_id, run_id = %run_id);

        async move {
            let started_at = Utc::now();
            let starting_group_id = self.archive.max_group_id(server_id).await?;

            let mut store = self.archive.scene_store(server_id);
            let mut engine = SegmentationEngine::new(server_id, config.clone(), &mut store)?
                .starting_after(starting_group_id)
                .with_cancellation(cancel);
            if let Some(tx) = progress {
                engine = engine.with_progress(tx);
            }

            let outcome = engine
                .run(self.archive.unassigned_messages(server_id))
                .await?;

            let run = SegmentationRun::from_outcome(
                run_id,
                server_id,
                starting_group_id,
                &outcome,
                started_at,
            );
            self.archive.record_run(&run).await?;

            info!(
                status = %run.status,
                processed = run.processed,
                groups_opened = run.groups_opened(),
                "segmentation run recorded"
            );
            Ok::<_, SegmentationError>(run)
        }
        .instrument(span)
        .await
    }
}

impl<A: ArchiveRepository + 'static> SegmentationService<A> {
    /// Segment several servers concurrently, one independent run per server.
    ///
    /// Each run gets a child of `cancel`, so cancelling the parent stops all
    /// of them at their next cancellation check. Runs wait for a permit, so
    /// no more than `max_concurrent_runs` hold an archive stream at once.
    /// Results are returned in the order of `server_ids`.
    pub async fn segment_servers(
        self: &Arc<Self>,
        server_ids: &[u64],
        config: &SegmentationConfig,
        cancel: &CancellationToken,
    ) -> Vec<(u64, Result<SegmentationRun, SegmentationError>)> {
        let mut tasks = JoinSet::new();
        let permits = Arc::new(Semaphore::new(self.max_concurrent_runs));

        for (index, &server_id) in server_ids.iter().enumerate() {
            let service = Arc::clone(self);
            let config = config.clone();
            let cancel = cancel.child_token();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        service
                            .segment_server(server_id, &config, cancel, None)
                            .await
                    }
                    Err(e) => Err(SegmentationError::Task(e.to_string())),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<SegmentationRun, SegmentationError>>> =
            server_ids.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => {
                    tracing::error!("segmentation task panicked: {e}");
                }
            }
        }

        server_ids
            .iter()
            .zip(results)
            .map(|(&server_id, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(SegmentationError::Task(format!(
                        "run for server {server_id} did not finish"
                    )))
                });
                (server_id, result)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
