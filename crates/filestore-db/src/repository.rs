//! Repository errors

use filestore::FileStoreError;

/// Error type for repository operations
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl RepositoryError {
    /// Map unique-constraint violations to `Conflict`
    pub fn from_write(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(format!("{} already exists", what))
            }
            _ => Self::Database(err),
        }
    }
}

impl From<RepositoryError> for FileStoreError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => FileStoreError::NotFound(what),
            other => FileStoreError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_file_store_error() {
        let err: FileStoreError = RepositoryError::NotFound("token-x".into()).into();
        assert!(matches!(err, FileStoreError::NotFound(ref t) if t == "token-x"));

        let err: FileStoreError = RepositoryError::Validation("bad status".into()).into();
        assert_eq!(err.error_code(), "database_error");
        assert!(err.to_string().contains("bad status"));
    }

    #[test]
    fn test_from_write_passes_through_other_errors() {
        let err = RepositoryError::from_write(sqlx::Error::RowNotFound, "file");
        assert!(matches!(err, RepositoryError::Database(_)));
    }
}
