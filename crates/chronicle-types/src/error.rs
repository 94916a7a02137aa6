use thiserror::Error;

/// Errors from repository operations (used by trait definitions in chronicle-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors that stop a segmentation run.
///
/// Hitting the group id limit and cancellation are not errors; they are
/// reported through `SegmentationOutcome`.
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("invalid segmentation config: {0}")]
    InvalidConfig(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("segmentation task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_segmentation_error_from_repository() {
        let err: SegmentationError = RepositoryError::Connection.into();
        assert!(matches!(err, SegmentationError::Repository(_)));
        assert_eq!(err.to_string(), "repository error: database connection error");
    }

    #[test]
    fn test_invalid_config_display() {
        let err = SegmentationError::InvalidConfig("batch_size must be at least 1".into());
        assert!(err.to_string().contains("batch_size"));
    }
}
