//! Archive repository trait definition.
//!
//! Defines the storage interface for archived messages, their scenes, and
//! segmentation run history. The infrastructure layer (chronicle-infra)
//! implements this trait with SQLite persistence.

use chronicle_types::error::RepositoryError;
use chronicle_types::message::ArchivedMessage;
use chronicle_types::scene::{ArchiveStats, SceneSummary, SegmentationRun};
use futures_util::stream::BoxStream;

use super::scene::SceneSink;

/// Repository trait for the message archive.
///
/// Covers three entity families:
/// - **Messages:** Import archived messages and stream the ones still
///   waiting for a scene.
/// - **Scenes:** Hand out a per-run [`SceneSink`] and list the scenes it wrote.
/// - **Runs:** Record and list segmentation runs for audit.
pub trait ArchiveRepository: Send + Sync {
    /// Sink type handed to the segmentation engine for one run.
    type Store: SceneSink + 'static;

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Insert messages, ignoring ids that are already archived.
    /// Returns the number of newly inserted messages.
    fn import_messages(
        &self,
        messages: &[ArchivedMessage],
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Stream a server's messages that have no scene yet, ordered by
    /// `(created_at, id)`.
    fn unassigned_messages(
        &self,
        server_id: u64,
    ) -> BoxStream<'static, Result<ArchivedMessage, RepositoryError>>;

    /// Servers that still have at least one unassigned message.
    fn servers_with_unassigned(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<u64>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Scenes
    // -----------------------------------------------------------------------

    /// A fresh registry/sink scoped to one run over `server_id`.
    fn scene_store(&self, server_id: u64) -> Self::Store;

    /// Highest committed group id for a server, or 0 when it has none.
    fn max_group_id(
        &self,
        server_id: u64,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// List a server's scenes ordered by group id.
    fn list_groups(
        &self,
        server_id: u64,
    ) -> impl std::future::Future<Output = Result<Vec<SceneSummary>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Persist the audit record of a finished run.
    fn record_run(
        &self,
        run: &SegmentationRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Most recent runs first, optionally filtered to one server.
    fn list_runs(
        &self,
        server_id: Option<u64>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<SegmentationRun>, RepositoryError>> + Send;

    /// Aggregate counts across the whole archive.
    fn archive_stats(
        &self,
    ) -> impl std::future::Future<Output = Result<ArchiveStats, RepositoryError>> + Send;
}
