//! Error types for wxcache-store.

use std::path::PathBuf;

/// Result type for wxcache-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in wxcache-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// SQLite failure, tagged with the store operation that hit it.
    #[error("Storage error during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Station not found in database.
    #[error("Station not found: {0}")]
    StationNotFound(String),

    /// A query could not be planned.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Name of the store operation that failed, for storage errors.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Error::Storage { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

/// Tag a SQLite result with the operation that produced it.
pub(crate) trait Operation<T> {
    fn during(self, operation: &'static str) -> Result<T>;
}

impl<T> Operation<T> for rusqlite::Result<T> {
    fn during(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| Error::Storage { operation, source })
    }
}
