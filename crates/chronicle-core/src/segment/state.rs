//! State shared by the segmentation engine and the backlog reconciler.

use chrono::{DateTime, Utc};

use chronicle_types::error::RepositoryError;
use chronicle_types::message::{ArchivedMessage, LocationKey};
use chronicle_types::scene::SceneGroup;

use crate::repository::scene::GroupRegistry;

/// Window anchors snap down to multiples of this many seconds.
const ANCHOR_GRANULARITY_SECS: i64 = 15 * 60;

// ---------------------------------------------------------------------------
// Scene cursor
// ---------------------------------------------------------------------------

/// The scene currently accepting messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneCursor {
    /// No scene is open; the next message opens one.
    Idle,
    /// A scene is open for one location.
    Open(OpenScene),
    /// A reconciliation pass hit a repeat-speaker conflict. Nothing else in
    /// the pass may join a scene, and no new scene opens until the next pass.
    ClosedForPass,
}

impl SceneCursor {
    pub fn open(group_id: u64, location: LocationKey) -> Self {
        SceneCursor::Open(OpenScene {
            group_id,
            location,
            registered: false,
        })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SceneCursor::Idle)
    }

    /// Whether an open scene exists for exactly this location.
    pub fn is_open_at(&self, location: &LocationKey) -> bool {
        matches!(self, SceneCursor::Open(scene) if &scene.location == location)
    }
}

/// A scene that has been allocated an id and is accepting messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenScene {
    pub group_id: u64,
    pub location: LocationKey,
    registered: bool,
}

impl OpenScene {
    /// Assign `message` to this scene and record it through the registry.
    ///
    /// The scene's metadata is registered with its first message.
    pub async fn assign<R: GroupRegistry>(
        &mut self,
        registry: &mut R,
        server_id: u64,
        message: &mut ArchivedMessage,
    ) -> Result<(), RepositoryError> {
        message.group_id = Some(self.group_id);

        if !self.registered {
            let group = SceneGroup {
                id: self.group_id,
                server_id,
                location: self.location.clone(),
                first_message_id: message.id,
                first_message_at: message.created_at,
            };
            registry.ensure_group(&group).await?;
            self.registered = true;
        }

        registry.assign_group(message).await
    }
}

// ---------------------------------------------------------------------------
// Group id allocation
// ---------------------------------------------------------------------------

/// Monotonic group id counter with an optional ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupIds {
    last: u64,
    limit: Option<u64>,
}

impl GroupIds {
    /// Start numbering after `last` (0 for a server with no scenes yet).
    pub fn new(last: u64, limit: Option<u64>) -> Self {
        Self { last, limit }
    }

    /// Allocate the next id, or `None` if it would exceed the limit.
    /// The counter does not advance on refusal.
    pub fn allocate(&mut self) -> Option<u64> {
        let next = self.last.checked_add(1)?;
        if self.limit.is_some_and(|limit| next > limit) {
            return None;
        }
        self.last = next;
        Some(next)
    }

    /// The most recently allocated id.
    pub fn last(&self) -> u64 {
        self.last
    }
}

// ---------------------------------------------------------------------------
// Control flow
// ---------------------------------------------------------------------------

/// Why a run stopped before consuming its whole input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    GroupLimit,
    Cancelled,
}

/// Result of a step that may have to stop the run.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt(Halt),
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

/// Per-run state of the main segmentation walk.
#[derive(Debug, Clone)]
pub(crate) struct EngineState {
    pub cursor: SceneCursor,
    /// Messages assigned to the open scene.
    pub active_count: u64,
    /// Start of the current time window.
    pub window_anchor: DateTime<Utc>,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            cursor: SceneCursor::Idle,
            active_count: 0,
            window_anchor: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Close the open scene and start a new window at `at`.
    pub fn reset(&mut self, at: DateTime<Utc>) {
        self.cursor = SceneCursor::Idle;
        self.active_count = 0;
        self.window_anchor = self.window_anchor.max(window_anchor(at));
    }
}

/// Truncate `at` down to the nearest 15-minute boundary.
pub fn window_anchor(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp();
    let aligned = secs - secs.rem_euclid(ANCHOR_GRANULARITY_SECS);
    DateTime::<Utc>::from_timestamp(aligned, 0).unwrap_or(at)
}

/// Whole minutes from `anchor` to `at`, rounded down.
pub fn elapsed_minutes(anchor: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    (at - anchor).num_seconds().div_euclid(60)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::testing::{RecordingSink, at_minute, msg};
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_window_anchor_truncates_to_quarter_hour() {
        let at = Utc.with_ymd_and_hms(2024, 5, 4, 13, 44, 59).unwrap();
        assert_eq!(
            window_anchor(at),
            Utc.with_ymd_and_hms(2024, 5, 4, 13, 30, 0).unwrap()
        );

        let aligned = Utc.with_ymd_and_hms(2024, 5, 4, 13, 45, 0).unwrap();
        assert_eq!(window_anchor(aligned), aligned);
    }

    #[test]
    fn test_window_anchor_drops_subsecond_precision() {
        let at = Utc.with_ymd_and_hms(2024, 5, 4, 0, 15, 0).unwrap() + Duration::milliseconds(750);
        assert_eq!(
            window_anchor(at),
            Utc.with_ymd_and_hms(2024, 5, 4, 0, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_elapsed_minutes_rounds_down() {
        let anchor = at_minute(0);
        assert_eq!(elapsed_minutes(anchor, anchor + Duration::seconds(59)), 0);
        assert_eq!(elapsed_minutes(anchor, anchor + Duration::seconds(60)), 1);
        assert_eq!(elapsed_minutes(anchor, at_minute(240)), 240);
    }

    #[test]
    fn test_group_ids_allocate_and_limit() {
        let mut ids = GroupIds::new(0, Some(2));
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(2));
        assert_eq!(ids.allocate(), None);
        // Refusal does not advance the counter
        assert_eq!(ids.last(), 2);
    }

    #[test]
    fn test_group_ids_unbounded_resume() {
        let mut ids = GroupIds::new(41, None);
        assert_eq!(ids.allocate(), Some(42));
        assert_eq!(ids.last(), 42);
    }

    #[test]
    fn test_cursor_matching() {
        let a = LocationKey::channel(1);
        let b = LocationKey::channel(2);

        assert!(!SceneCursor::Idle.is_open_at(&a));
        assert!(!SceneCursor::ClosedForPass.is_open_at(&a));

        let open = SceneCursor::open(1, a.clone());
        assert!(open.is_open_at(&a));
        assert!(!open.is_open_at(&b));
        assert!(!open.is_idle());
    }

    #[test]
    fn test_engine_state_anchor_never_moves_back() {
        let mut state = EngineState::new();
        state.reset(at_minute(60));
        assert_eq!(state.window_anchor, at_minute(60));

        state.reset(at_minute(20));
        assert_eq!(state.window_anchor, at_minute(60));
        assert!(state.cursor.is_idle());
        assert_eq!(state.active_count, 0);
    }

    #[tokio::test]
    async fn test_open_scene_registers_once() {
        let mut sink = RecordingSink::default();
        let mut cursor = SceneCursor::open(7, LocationKey::channel(1));
        let SceneCursor::Open(scene) = &mut cursor else {
            unreachable!()
        };

        let mut first = msg(10, 1, 1, 0);
        let mut second = msg(11, 2, 1, 1);
        scene.assign(&mut sink, 99, &mut first).await.unwrap();
        scene.assign(&mut sink, 99, &mut second).await.unwrap();

        assert_eq!(first.group_id, Some(7));
        assert_eq!(second.group_id, Some(7));
        assert_eq!(sink.ensure_calls, 1);

        sink.commit_now();
        let group = &sink.groups[&7];
        assert_eq!(group.server_id, 99);
        assert_eq!(group.first_message_id, 10);
        assert_eq!(sink.assignments.len(), 2);
    }
}
