//! File store errors

use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by the file record store
#[derive(Debug, Error)]
pub enum FileStoreError {
    /// Token or id lookup miss
    #[error("File not found: {0}")]
    NotFound(String),
    /// Unreadable source or failed blob write; nothing was persisted
    #[error("Ingest failed: {0}")]
    Ingest(String),
    /// Thumbnail source or target format cannot be decoded or encoded
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Storage error: {0}")]
    Store(#[from] StorageError),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FileStoreError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Stable identifier for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Ingest(_) => "ingest_failed",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::Store(_) => "storage_error",
            Self::Database(_) => "database_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

pub type FileStoreResult<T> = Result<T, FileStoreError>;
