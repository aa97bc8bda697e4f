//! Storage error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid path reference: {0}")]
    InvalidPath(String),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Delete failed for {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn invalid_path(reference: impl Into<String>) -> Self {
        Self::InvalidPath(reference.into())
    }

    /// True if the error means the file does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::DeleteFailed { source, .. } | StorageError::Io(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            StorageError::InvalidPath(_) => false,
        }
    }
}
