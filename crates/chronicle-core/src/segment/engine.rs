//! The main segmentation walk.
//!
//! `SegmentationEngine` consumes a server's messages in timestamp order,
//! keeps exactly one scene open at a time, and defers messages from any
//! other location to the backlog. It splits (closes the open scene, drains
//! the backlog, and starts a new time window) when any of these holds:
//!
//! - the open scene has grown past `max_with_other` and another location speaks;
//! - an author waiting in the backlog speaks again in the open scene;
//! - `with_backlog_interval_minutes` have passed and there is a backlog or a
//!   location change;
//! - `force_interval_minutes` have passed, unconditionally.
//!
//! Commits happen only at splits, after each backlog pass, and at end of
//! stream, so a crash leaves a consistent prefix of scene assignments.

use std::pin::pin;

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chronicle_types::config::SegmentationConfig;
use chronicle_types::error::{RepositoryError, SegmentationError};
use chronicle_types::message::ArchivedMessage;
use chronicle_types::scene::{SegmentationOutcome, SegmentationProgress};

use super::backlog::{Backlog, BacklogReconciler};
use super::pacer::Pacer;
use super::state::{EngineState, Flow, GroupIds, Halt, SceneCursor, elapsed_minutes};
use crate::repository::scene::SceneSink;

/// Which condition closed the open scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitReason {
    /// The open scene is large and another location spoke.
    SceneFull,
    /// An author waiting in the backlog spoke in the open scene.
    AuthorConflict,
    /// The backlog window elapsed with pending work elsewhere.
    BacklogWindow,
    /// The hard time ceiling elapsed.
    HardCeiling,
}

/// Single-pass scene segmentation over one server's message stream.
///
/// Borrows the sink for the duration of the run; the engine is its only
/// writer. Build with [`SegmentationEngine::new`], optionally chain
/// `starting_after`, `with_cancellation` and `with_progress`, then call
/// [`run`](Self::run).
pub struct SegmentationEngine<'a, W: SceneSink> {
    server_id: u64,
    config: SegmentationConfig,
    sink: &'a mut W,
    ids: GroupIds,
    /// Highest group id whose scene has been committed.
    committed_group_id: u64,
    cancel: CancellationToken,
    pacer: Pacer,
    progress: Option<watch::Sender<SegmentationProgress>>,
    state: EngineState,
    backlog: Backlog,
    processed: u64,
}

impl<'a, W: SceneSink> SegmentationEngine<'a, W> {
    /// Create an engine for `server_id`. Group ids start at 1.
    pub fn new(
        server_id: u64,
        config: SegmentationConfig,
        sink: &'a mut W,
    ) -> Result<Self, SegmentationError> {
        config.validate().map_err(SegmentationError::InvalidConfig)?;

        Ok(Self {
            server_id,
            ids: GroupIds::new(0, config.group_id_limit),
            committed_group_id: 0,
            pacer: Pacer::new(&config.pacing),
            config,
            sink,
            cancel: CancellationToken::new(),
            progress: None,
            state: EngineState::new(),
            backlog: Backlog::new(),
            processed: 0,
        })
    }

    /// Continue numbering after an existing group id.
    pub fn starting_after(mut self, group_id: u64) -> Self {
        self.ids = GroupIds::new(group_id, self.config.group_id_limit);
        self.committed_group_id = group_id;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish progress snapshots at every yield point and at the end.
    pub fn with_progress(mut self, progress: watch::Sender<SegmentationProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Consume `stream` and assign every message to a scene.
    ///
    /// Errors from the stream or the sink abort the run and propagate;
    /// anything committed before the error stays committed.
    pub async fn run<S>(mut self, stream: S) -> Result<SegmentationOutcome, SegmentationError>
    where
        S: Stream<Item = Result<ArchivedMessage, RepositoryError>> + Send,
    {
        let mut stream = pin!(stream);

        info!(
            server_id = self.server_id,
            starting_group_id = self.ids.last(),
            "segmentation started"
        );

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.halted(Halt::Cancelled));
            }

            let Some(next) = stream.next().await else {
                break;
            };

            if let Flow::Halt(halt) = self.ingest(next?).await? {
                return Ok(self.halted(halt));
            }
            self.processed += 1;

            if self.pacer.tick().await {
                self.report_progress();
            }
        }

        // End of stream: close the open scene and flush the backlog.
        self.commit().await?;
        let backlog = std::mem::take(&mut self.backlog);
        if let Flow::Halt(halt) = self.reconcile(backlog).await? {
            return Ok(self.halted(halt));
        }

        self.report_progress();
        info!(
            server_id = self.server_id,
            processed = self.processed,
            final_group_id = self.committed_group_id,
            "segmentation completed"
        );

        Ok(SegmentationOutcome::Completed {
            processed: self.processed,
            final_group_id: self.committed_group_id,
        })
    }

    /// Place one message: split if needed, then assign it or defer it.
    async fn ingest(&mut self, mut message: ArchivedMessage) -> Result<Flow, SegmentationError> {
        message.is_active = false;

        let elapsed = elapsed_minutes(self.state.window_anchor, message.created_at);
        if let Some(reason) = self.split_reason(&message, elapsed) {
            debug!(
                server_id = self.server_id,
                message_id = message.id,
                ?reason,
                elapsed,
                active_count = self.state.active_count,
                backlog = self.backlog.len(),
                "splitting scene"
            );
            if let Flow::Halt(halt) = self.split(message.created_at).await? {
                return Ok(Flow::Halt(halt));
            }
        }

        if self.state.cursor.is_idle() {
            let Some(group_id) = self.ids.allocate() else {
                return Ok(Flow::Halt(Halt::GroupLimit));
            };
            self.state.cursor = SceneCursor::open(group_id, message.location.clone());
        }

        match &mut self.state.cursor {
            SceneCursor::Open(scene) if scene.location == message.location => {
                scene
                    .assign(&mut *self.sink, self.server_id, &mut message)
                    .await?;
                self.state.active_count += 1;
            }
            _ => self.backlog.push(message),
        }

        Ok(Flow::Continue)
    }

    /// Evaluate the split conditions in priority order.
    fn split_reason(&self, message: &ArchivedMessage, elapsed: i64) -> Option<SplitReason> {
        let config = &self.config;
        let here = self.state.cursor.is_open_at(&message.location);

        if self.state.active_count > config.max_with_other && !here {
            Some(SplitReason::SceneFull)
        } else if here && self.backlog.contains_author(message.author_id) {
            Some(SplitReason::AuthorConflict)
        } else if elapsed >= config.with_backlog_interval_minutes
            && (!self.backlog.is_empty() || !here)
        {
            Some(SplitReason::BacklogWindow)
        } else if elapsed >= config.force_interval_minutes {
            Some(SplitReason::HardCeiling)
        } else {
            None
        }
    }

    /// Close the open scene, drain the backlog, and re-anchor the window at `at`.
    async fn split(&mut self, at: DateTime<Utc>) -> Result<Flow, SegmentationError> {
        self.commit().await?;

        let backlog = std::mem::take(&mut self.backlog);
        let flow = self.reconcile(backlog).await?;

        self.state.reset(at);
        Ok(flow)
    }

    /// Commit buffered writes. Every allocated scene is now persisted.
    async fn commit(&mut self) -> Result<(), SegmentationError> {
        self.sink.commit().await?;
        self.committed_group_id = self.ids.last();
        Ok(())
    }

    async fn reconcile(&mut self, backlog: Backlog) -> Result<Flow, SegmentationError> {
        if backlog.is_empty() {
            return Ok(Flow::Continue);
        }

        let flow =
            BacklogReconciler::new(self.server_id, &mut *self.sink, &self.cancel, &mut self.pacer)
                .drain(backlog, &mut self.ids)
                .await?;
        // Passes commit before returning and a halted pass allocates nothing.
        self.committed_group_id = self.ids.last();
        Ok(flow)
    }

    fn halted(&self, halt: Halt) -> SegmentationOutcome {
        self.report_progress();

        match halt {
            Halt::GroupLimit => {
                warn!(
                    server_id = self.server_id,
                    processed = self.processed,
                    last_group_id = self.committed_group_id,
                    limit = ?self.config.group_id_limit,
                    "segmentation stopped at group id limit"
                );
                SegmentationOutcome::GroupLimitReached {
                    processed: self.processed,
                    last_group_id: self.committed_group_id,
                }
            }
            Halt::Cancelled => {
                warn!(
                    server_id = self.server_id,
                    processed = self.processed,
                    last_group_id = self.committed_group_id,
                    discarded_groups = self.ids.last().saturating_sub(self.committed_group_id),
                    "segmentation cancelled"
                );
                SegmentationOutcome::Cancelled {
                    processed: self.processed,
                    last_group_id: self.committed_group_id,
                }
            }
        }
    }

    fn report_progress(&self) {
        let snapshot = SegmentationProgress {
            server_id: self.server_id,
            processed: self.processed,
            group_id: self.ids.last(),
            backlog_len: self.backlog.len(),
        };

        info!(
            server_id = snapshot.server_id,
            processed = snapshot.processed,
            group_id = snapshot.group_id,
            backlog = snapshot.backlog_len,
            "segmentation progress"
        );

        if let Some(tx) = &self.progress {
            tx.send_replace(snapshot);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
