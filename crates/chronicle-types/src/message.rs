//! Archived chat message domain types for Chronicle.
//!
//! An `ArchivedMessage` is one message collected from a chat server's history.
//! Segmentation only cares about who spoke, where, and when; message content
//! itself never enters this crate (only its length is kept).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a message was posted: the category / channel / thread triple.
///
/// Scenes are built around location keys. Two messages belong to the same
/// location only when all three parts match, so a thread is a different
/// location from its parent channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationKey {
    /// Category the channel lives under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<u64>,
    /// Channel the message was posted in.
    pub channel_id: u64,
    /// Thread inside the channel, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<u64>,
}

impl LocationKey {
    pub fn new(category_id: Option<u64>, channel_id: u64, thread_id: Option<u64>) -> Self {
        Self {
            category_id,
            channel_id,
            thread_id,
        }
    }

    /// A plain channel with no category and no thread.
    pub fn channel(channel_id: u64) -> Self {
        Self::new(None, channel_id, None)
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |v: Option<u64>| v.map_or_else(|| "none".to_string(), |v| v.to_string());
        write!(
            f,
            "{}-{}-{}",
            part(self.category_id),
            self.channel_id,
            part(self.thread_id)
        )
    }
}

/// A message from a server's archived history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedMessage {
    /// Chat-service message id (unique across servers).
    pub id: u64,
    /// Server the message was collected from.
    pub server_id: u64,
    /// Author of the message.
    pub author_id: u64,
    /// Where the message was posted.
    pub location: LocationKey,
    /// When the message was posted.
    pub created_at: DateTime<Utc>,
    /// Length of the message content in characters.
    #[serde(default)]
    pub content_length: u32,
    /// Scene this message was assigned to, once segmentation has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u64>,
    /// Cleared when the segmentation engine ingests the message.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl ArchivedMessage {
    /// Whether segmentation has placed this message in a scene.
    pub fn is_assigned(&self) -> bool {
        self.group_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_location_key_display() {
        let key = LocationKey::new(Some(10), 20, None);
        assert_eq!(key.to_string(), "10-20-none");

        let threaded = LocationKey::new(None, 20, Some(30));
        assert_eq!(threaded.to_string(), "none-20-30");
    }

    #[test]
    fn test_thread_is_distinct_location_from_channel() {
        let channel = LocationKey::new(Some(1), 2, None);
        let thread = LocationKey::new(Some(1), 2, Some(3));
        assert_ne!(channel, thread);
    }

    #[test]
    fn test_archived_message_deserialize_defaults() {
        let json = r#"{
            "id": 1001,
            "server_id": 7,
            "author_id": 42,
            "location": {"channel_id": 55},
            "created_at": "2024-03-01T12:00:00Z"
        }"#;
        let msg: ArchivedMessage = serde_json::from_str(json).unwrap();

        assert_eq!(msg.location, LocationKey::channel(55));
        assert_eq!(msg.content_length, 0);
        assert!(msg.group_id.is_none());
        assert!(msg.is_active);
        assert!(!msg.is_assigned());
        assert_eq!(
            msg.created_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_archived_message_omits_unassigned_group() {
        let msg = ArchivedMessage {
            id: 1,
            server_id: 2,
            author_id: 3,
            location: LocationKey::new(Some(4), 5, Some(6)),
            created_at: Utc::now(),
            content_length: 12,
            group_id: None,
            is_active: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("group_id"));
        assert!(json.contains("\"thread_id\":6"));
    }
}
