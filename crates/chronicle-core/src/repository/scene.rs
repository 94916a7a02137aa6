//! Scene sink trait definitions.
//!
//! The segmentation engine writes through two narrow ports: a
//! [`GroupRegistry`] that records scene metadata and per-message assignments,
//! and a [`PersistenceSink`] that makes everything recorded so far durable.
//! The infrastructure layer implements both on one SQLite-backed store.

use chronicle_types::error::RepositoryError;
use chronicle_types::message::ArchivedMessage;
use chronicle_types::scene::SceneGroup;

/// Records scenes and the scene each message belongs to.
///
/// Implementations own their "already registered" bookkeeping, so
/// `ensure_group` must be idempotent: calling it again for an id that is
/// already known is a no-op.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait GroupRegistry: Send {
    /// Register scene metadata the first time a group id is used.
    fn ensure_group(
        &mut self,
        group: &SceneGroup,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Record `message.group_id` (and the cleared active flag) for a message.
    fn assign_group(
        &mut self,
        message: &ArchivedMessage,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// Commit checkpoint for everything recorded through the registry.
///
/// The engine calls `commit` only between completed scenes and completed
/// backlog passes. Writes recorded after the last commit may be discarded
/// if the run stops early.
pub trait PersistenceSink: Send {
    fn commit(&mut self) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// A store that is both a registry and a sink. Blanket-implemented.
pub trait SceneSink: GroupRegistry + PersistenceSink {}

impl<T: GroupRegistry + PersistenceSink> SceneSink for T {}
