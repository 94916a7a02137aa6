//! Scene (group) domain types for Chronicle.
//!
//! A scene is a contiguous run of activity in one location. Segmentation
//! assigns every archived message to exactly one scene and records an audit
//! row for each run.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::LocationKey;

/// Metadata for one scene, registered the first time its id is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneGroup {
    /// Monotonically increasing id, unique per server.
    pub id: u64,
    pub server_id: u64,
    /// The location this scene was opened for.
    pub location: LocationKey,
    /// The first message assigned to the scene.
    pub first_message_id: u64,
    pub first_message_at: DateTime<Utc>,
}

/// A scene together with aggregate facts about its messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSummary {
    pub group: SceneGroup,
    pub message_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// How a segmentation run ended.
///
/// Only `Completed` guarantees that every ingested message was assigned.
/// The other two leave unassigned messages behind for a later run to pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SegmentationOutcome {
    /// The stream was fully consumed and the backlog drained.
    Completed { processed: u64, final_group_id: u64 },
    /// Opening another scene would exceed the configured group id limit.
    GroupLimitReached { processed: u64, last_group_id: u64 },
    /// The run was cancelled cooperatively. `last_group_id` is the highest
    /// committed scene; a scene open at cancellation is not counted.
    Cancelled { processed: u64, last_group_id: u64 },
}

impl SegmentationOutcome {
    pub fn processed(&self) -> u64 {
        match *self {
            Self::Completed { processed, .. }
            | Self::GroupLimitReached { processed, .. }
            | Self::Cancelled { processed, .. } => processed,
        }
    }

    /// The highest group id the run committed.
    pub fn group_id(&self) -> u64 {
        match *self {
            Self::Completed { final_group_id, .. } => final_group_id,
            Self::GroupLimitReached { last_group_id, .. }
            | Self::Cancelled { last_group_id, .. } => last_group_id,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed { .. } => RunStatus::Completed,
            Self::GroupLimitReached { .. } => RunStatus::GroupLimitReached,
            Self::Cancelled { .. } => RunStatus::Cancelled,
        }
    }
}

/// Persisted status of a segmentation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    GroupLimitReached,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::GroupLimitReached => write!(f, "group_limit_reached"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(RunStatus::Completed),
            "group_limit_reached" => Ok(RunStatus::GroupLimitReached),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: '{other}'")),
        }
    }
}

/// Audit record for one segmentation run over one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationRun {
    /// UUIDv7 run id.
    pub id: Uuid,
    pub server_id: u64,
    pub status: RunStatus,
    /// Messages handled by the engine (assigned or deferred).
    pub processed: u64,
    /// Group id the run started numbering after.
    pub starting_group_id: u64,
    /// Highest group id committed by the run.
    pub final_group_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SegmentationRun {
    /// Build the audit record for a finished run.
    pub fn from_outcome(
        id: Uuid,
        server_id: u64,
        starting_group_id: u64,
        outcome: &SegmentationOutcome,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            server_id,
            status: outcome.status(),
            processed: outcome.processed(),
            starting_group_id,
            final_group_id: outcome.group_id(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Number of scenes opened by this run.
    pub fn groups_opened(&self) -> u64 {
        self.final_group_id.saturating_sub(self.starting_group_id)
    }
}

/// Snapshot published while a run is in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationProgress {
    pub server_id: u64,
    pub processed: u64,
    pub group_id: u64,
    pub backlog_len: usize,
}

/// Aggregate counts over the whole archive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub messages: u64,
    pub unassigned: u64,
    pub groups: u64,
    pub servers: u64,
    pub runs: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
