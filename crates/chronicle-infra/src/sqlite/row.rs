//! Row types and conversion helpers shared by the SQLite repositories.
//!
//! Chat-service ids are unsigned 64-bit values stored in SQLite's signed
//! INTEGER column type; the cast round-trips bit-for-bit. Datetimes are
//! stored as fixed-width RFC 3339 text in UTC so that text order matches
//! time order.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use uuid::Uuid;

use chronicle_types::error::RepositoryError;
use chronicle_types::message::{ArchivedMessage, LocationKey};
use chronicle_types::scene::{RunStatus, SceneGroup, SceneSummary, SegmentationRun};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub(super) struct MessageRow {
    id: i64,
    server_id: i64,
    author_id: i64,
    category_id: Option<i64>,
    channel_id: i64,
    thread_id: Option<i64>,
    created_at: String,
    content_length: i64,
    group_id: Option<i64>,
    is_active: bool,
}

impl MessageRow {
    pub(super) fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            server_id: row.try_get("server_id")?,
            author_id: row.try_get("author_id")?,
            category_id: row.try_get("category_id")?,
            channel_id: row.try_get("channel_id")?,
            thread_id: row.try_get("thread_id")?,
            created_at: row.try_get("created_at")?,
            content_length: row.try_get("content_length")?,
            group_id: row.try_get("group_id")?,
            is_active: row.try_get("is_active")?,
        })
    }

    pub(super) fn into_message(self) -> Result<ArchivedMessage, RepositoryError> {
        Ok(ArchivedMessage {
            id: from_db_id(self.id),
            server_id: from_db_id(self.server_id),
            author_id: from_db_id(self.author_id),
            location: LocationKey::new(
                self.category_id.map(from_db_id),
                from_db_id(self.channel_id),
                self.thread_id.map(from_db_id),
            ),
            created_at: parse_datetime(&self.created_at)?,
            content_length: u32::try_from(self.content_length).map_err(|_| {
                RepositoryError::Query(format!("invalid content_length: {}", self.content_length))
            })?,
            group_id: self.group_id.map(from_db_id),
            is_active: self.is_active,
        })
    }
}

// ---------------------------------------------------------------------------
// Scenes
// ---------------------------------------------------------------------------

pub(super) struct SceneSummaryRow {
    group_id: i64,
    server_id: i64,
    category_id: Option<i64>,
    channel_id: i64,
    thread_id: Option<i64>,
    first_message_id: i64,
    first_message_at: String,
    message_count: i64,
    last_message_at: Option<String>,
}

impl SceneSummaryRow {
    pub(super) fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            group_id: row.try_get("group_id")?,
            server_id: row.try_get("server_id")?,
            category_id: row.try_get("category_id")?,
            channel_id: row.try_get("channel_id")?,
            thread_id: row.try_get("thread_id")?,
            first_message_id: row.try_get("first_message_id")?,
            first_message_at: row.try_get("first_message_at")?,
            message_count: row.try_get("message_count")?,
            last_message_at: row.try_get("last_message_at")?,
        })
    }

    pub(super) fn into_summary(self) -> Result<SceneSummary, RepositoryError> {
        Ok(SceneSummary {
            group: SceneGroup {
                id: from_db_id(self.group_id),
                server_id: from_db_id(self.server_id),
                location: LocationKey::new(
                    self.category_id.map(from_db_id),
                    from_db_id(self.channel_id),
                    self.thread_id.map(from_db_id),
                ),
                first_message_id: from_db_id(self.first_message_id),
                first_message_at: parse_datetime(&self.first_message_at)?,
            },
            message_count: self.message_count.max(0) as u64,
            last_message_at: self
                .last_message_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

pub(super) struct RunRow {
    id: String,
    server_id: i64,
    status: String,
    processed: i64,
    starting_group_id: i64,
    final_group_id: i64,
    started_at: String,
    finished_at: String,
}

impl RunRow {
    pub(super) fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            server_id: row.try_get("server_id")?,
            status: row.try_get("status")?,
            processed: row.try_get("processed")?,
            starting_group_id: row.try_get("starting_group_id")?,
            final_group_id: row.try_get("final_group_id")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    pub(super) fn into_run(self) -> Result<SegmentationRun, RepositoryError> {
        Ok(SegmentationRun {
            id: parse_uuid(&self.id)?,
            server_id: from_db_id(self.server_id),
            status: self
                .status
                .parse::<RunStatus>()
                .map_err(RepositoryError::Query)?,
            processed: self.processed.max(0) as u64,
            starting_group_id: from_db_id(self.starting_group_id),
            final_group_id: from_db_id(self.final_group_id),
            started_at: parse_datetime(&self.started_at)?,
            finished_at: parse_datetime(&self.finished_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(super) fn to_db_id(id: u64) -> i64 {
    id as i64
}

pub(super) fn from_db_id(id: i64) -> u64 {
    id as u64
}

pub(super) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(super) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(super) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}
