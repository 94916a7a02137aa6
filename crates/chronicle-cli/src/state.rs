//! Application state wiring the archive and segmentation service together.
//!
//! The segmentation service is generic over the archive repository trait;
//! AppState pins it to the SQLite implementation.

use std::path::PathBuf;
use std::sync::Arc;

use chronicle_core::service::segmentation::SegmentationService;
use chronicle_infra::config::load_global_config;
use chronicle_infra::filesystem::resolve_data_dir;
use chronicle_infra::sqlite::archive::SqliteArchiveRepository;
use chronicle_infra::sqlite::pool::{DatabasePool, READER_MAX_CONNECTIONS, database_url};
use chronicle_types::config::GlobalConfig;

/// Segmentation service pinned to the SQLite archive.
pub type ConcreteSegmentationService = SegmentationService<SqliteArchiveRepository>;

/// Shared state for command handlers.
#[derive(Clone)]
pub struct AppState {
    pub segmentation_service: Arc<ConcreteSegmentationService>,
    pub config: GlobalConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;
        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;

        let archive = SqliteArchiveRepository::new(db_pool);
        // Leave reader connections free for listing and stats queries.
        let segmentation_service = SegmentationService::new(archive)
            .with_max_concurrent_runs(READER_MAX_CONNECTIONS as usize / 2);

        Ok(Self {
            segmentation_service: Arc::new(segmentation_service),
            config,
            data_dir,
        })
    }

    /// The archive behind the segmentation service.
    pub fn archive(&self) -> &SqliteArchiveRepository {
        self.segmentation_service.archive()
    }
}
