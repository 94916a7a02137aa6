//! In-memory sink and message builders shared by the segmentation tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures_util::Stream;

use chronicle_types::config::SegmentationConfig;
use chronicle_types::error::RepositoryError;
use chronicle_types::message::{ArchivedMessage, LocationKey};
use chronicle_types::scene::SceneGroup;

use crate::repository::scene::{GroupRegistry, PersistenceSink};

/// Records registry writes, keeping uncommitted writes apart from committed ones.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pending_groups: Vec<SceneGroup>,
    pending_assignments: Vec<ArchivedMessage>,
    pub groups: BTreeMap<u64, SceneGroup>,
    pub assignments: BTreeMap<u64, ArchivedMessage>,
    pub ensure_calls: usize,
    pub commits: usize,
}

impl RecordingSink {
    /// Committed group id of a message, if any.
    pub fn group_of(&self, message_id: u64) -> Option<u64> {
        self.assignments.get(&message_id).and_then(|m| m.group_id)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_groups.is_empty() || !self.pending_assignments.is_empty()
    }

    pub fn commit_now(&mut self) {
        for group in self.pending_groups.drain(..) {
            self.groups.entry(group.id).or_insert(group);
        }
        for message in self.pending_assignments.drain(..) {
            self.assignments.insert(message.id, message);
        }
        self.commits += 1;
    }
}

impl GroupRegistry for RecordingSink {
    async fn ensure_group(&mut self, group: &SceneGroup) -> Result<(), RepositoryError> {
        self.ensure_calls += 1;
        let known = self.groups.contains_key(&group.id)
            || self.pending_groups.iter().any(|g| g.id == group.id);
        if !known {
            self.pending_groups.push(group.clone());
        }
        Ok(())
    }

    async fn assign_group(&mut self, message: &ArchivedMessage) -> Result<(), RepositoryError> {
        self.pending_assignments.push(message.clone());
        Ok(())
    }
}

impl PersistenceSink for RecordingSink {
    async fn commit(&mut self) -> Result<(), RepositoryError> {
        self.commit_now();
        Ok(())
    }
}

/// 2024-01-01 00:00 UTC plus `minutes`. The base sits on a 15-minute boundary.
pub fn at_minute(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

/// A server-1 message in a plain channel.
pub fn msg(id: u64, author_id: u64, channel_id: u64, minute: i64) -> ArchivedMessage {
    ArchivedMessage {
        id,
        server_id: 1,
        author_id,
        location: LocationKey::channel(channel_id),
        created_at: at_minute(minute),
        content_length: 40,
        group_id: None,
        is_active: true,
    }
}

pub fn stream_of(
    messages: Vec<ArchivedMessage>,
) -> impl Stream<Item = Result<ArchivedMessage, RepositoryError>> + Send {
    futures_util::stream::iter(messages.into_iter().map(Ok))
}

/// Thresholds `(force, with_backlog, max_with_other)` with no group limit
/// and a large pacing batch.
pub fn config(force: i64, with_backlog: i64, max_with_other: u64) -> SegmentationConfig {
    let mut config = SegmentationConfig {
        force_interval_minutes: force,
        with_backlog_interval_minutes: with_backlog,
        max_with_other,
        group_id_limit: None,
        ..Default::default()
    };
    config.pacing.batch_size = 10_000;
    config
}
