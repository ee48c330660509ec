use thiserror::Error;
use tokio::task::JoinError;

use crate::utils::ingest_limits::ValidationError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("Chunking error: {0}")]
    Chunking(String),
    #[error("Storage fetch error: {0}")]
    StorageFetch(String),
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Stable code persisted next to the diagnostic of a failed document.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Storage(_) => "storage_error",
            AppError::Validation(_) => "validation_failed",
            AppError::Extraction(_) => "extraction_failed",
            AppError::Chunking(_) => "chunking_failed",
            AppError::StorageFetch(_) => "storage_fetch_failed",
            AppError::ConcurrencyConflict(_) => "in_progress",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::Join(_) => "task_join_failed",
            AppError::Io(_) => "io_error",
            AppError::Config(_) => "config_error",
            AppError::InternalError(_) => "internal_error",
        }
    }

    /// Errors that are reported straight back to the caller of `submit`/`reprocess`.
    pub fn is_synchronous_rejection(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_) | AppError::ConcurrencyConflict(_) | AppError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_error_taxonomy() {
        assert_eq!(
            AppError::Extraction("corrupt".into()).code(),
            "extraction_failed"
        );
        assert_eq!(AppError::Chunking("empty".into()).code(), "chunking_failed");
        assert_eq!(
            AppError::StorageFetch("missing".into()).code(),
            "storage_fetch_failed"
        );
        assert_eq!(
            AppError::ConcurrencyConflict("busy".into()).code(),
            "in_progress"
        );
    }

    #[test]
    fn only_caller_facing_errors_are_synchronous() {
        assert!(AppError::from(ValidationError::EmptyPayload).is_synchronous_rejection());
        assert!(AppError::ConcurrencyConflict("busy".into()).is_synchronous_rejection());
        assert!(!AppError::Extraction("bad".into()).is_synchronous_rejection());
        assert!(!AppError::StorageFetch("gone".into()).is_synchronous_rejection());
    }
}
