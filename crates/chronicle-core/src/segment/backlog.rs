//! Deferred messages and the multi-pass backlog reconciler.
//!
//! Messages that arrive while a scene is open somewhere else are queued in a
//! [`Backlog`]. When the engine splits (or the stream ends) the
//! [`BacklogReconciler`] drains the queue into scenes:
//!
//! 1. The first queued message opens a new scene for its location.
//! 2. Later messages from that location join it, in FIFO order.
//! 3. Messages from other locations are re-queued, and their authors noted.
//! 4. If a re-queued author speaks again in the open scene, the scene is
//!    closed for the rest of the pass, since the conversation moved and came
//!    back. Everything after that point is re-queued.
//! 5. Each pass is committed and the re-queued messages form the next pass.
//!
//! Every pass assigns at least its first message, so draining terminates
//! after at most one pass per message.

use std::collections::{HashSet, VecDeque};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use chronicle_types::error::SegmentationError;
use chronicle_types::message::ArchivedMessage;

use super::pacer::Pacer;
use super::state::{Flow, GroupIds, Halt, SceneCursor};
use crate::repository::scene::SceneSink;

// ---------------------------------------------------------------------------
// Backlog
// ---------------------------------------------------------------------------

/// FIFO queue of deferred messages plus the authors seen in it.
#[derive(Debug, Default)]
pub struct Backlog {
    queue: VecDeque<ArchivedMessage>,
    authors: HashSet<u64>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ArchivedMessage) {
        self.authors.insert(message.author_id);
        self.queue.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether `author_id` has a message waiting in this backlog.
    pub fn contains_author(&self, author_id: u64) -> bool {
        self.authors.contains(&author_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArchivedMessage> {
        self.queue.iter()
    }

    fn into_messages(self) -> impl Iterator<Item = ArchivedMessage> {
        self.queue.into_iter()
    }
}

impl FromIterator<ArchivedMessage> for Backlog {
    fn from_iter<I: IntoIterator<Item = ArchivedMessage>>(iter: I) -> Self {
        let mut backlog = Backlog::new();
        for message in iter {
            backlog.push(message);
        }
        backlog
    }
}

// ---------------------------------------------------------------------------
// BacklogReconciler
// ---------------------------------------------------------------------------

/// Drains a [`Backlog`] into scenes, one pass at a time.
pub struct BacklogReconciler<'a, W: SceneSink> {
    server_id: u64,
    sink: &'a mut W,
    cancel: &'a CancellationToken,
    pacer: &'a mut Pacer,
}

impl<'a, W: SceneSink> BacklogReconciler<'a, W> {
    pub fn new(
        server_id: u64,
        sink: &'a mut W,
        cancel: &'a CancellationToken,
        pacer: &'a mut Pacer,
    ) -> Self {
        Self {
            server_id,
            sink,
            cancel,
            pacer,
        }
    }

    /// Assign every message in `backlog` to a scene, allocating ids from `ids`.
    ///
    /// Commits after each pass. Stops early (leaving the remaining messages
    /// unassigned) if cancellation is requested at a pass boundary or if a
    /// new scene would exceed the group id limit.
    pub async fn drain(
        &mut self,
        mut backlog: Backlog,
        ids: &mut GroupIds,
    ) -> Result<Flow, SegmentationError> {
        let mut pass = 0u32;

        while !backlog.is_empty() {
            if self.cancel.is_cancelled() {
                debug!(
                    server_id = self.server_id,
                    remaining = backlog.len(),
                    "backlog drain cancelled at pass boundary"
                );
                return Ok(Flow::Halt(Halt::Cancelled));
            }

            pass += 1;
            let before = backlog.len();
            let (deferred, flow) = self.run_pass(backlog, ids).await?;
            if let Flow::Halt(halt) = flow {
                return Ok(Flow::Halt(halt));
            }

            self.sink.commit().await?;
            debug!(
                server_id = self.server_id,
                pass,
                assigned = before - deferred.len(),
                deferred = deferred.len(),
                group_id = ids.last(),
                "backlog pass complete"
            );

            backlog = deferred;
            self.pacer.tick().await;
        }

        Ok(Flow::Continue)
    }

    /// One pass: open a scene with the first message, fill it, re-queue the rest.
    async fn run_pass(
        &mut self,
        backlog: Backlog,
        ids: &mut GroupIds,
    ) -> Result<(Backlog, Flow), SegmentationError> {
        let mut deferred = Backlog::new();
        let mut cursor = SceneCursor::Idle;

        for mut message in backlog.into_messages() {
            if deferred.contains_author(message.author_id) && cursor.is_open_at(&message.location)
            {
                cursor = SceneCursor::ClosedForPass;
            }

            if cursor.is_idle() {
                let Some(group_id) = ids.allocate() else {
                    return Ok((deferred, Flow::Halt(Halt::GroupLimit)));
                };
                cursor = SceneCursor::open(group_id, message.location.clone());
            }

            match &mut cursor {
                SceneCursor::Open(scene) if scene.location == message.location => {
                    scene
                        .assign(&mut *self.sink, self.server_id, &mut message)
                        .await?;
                }
                _ => deferred.push(message),
            }
        }

        Ok((deferred, Flow::Continue))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
