//! Error types for tandem-core

use thiserror::Error;

use crate::client::ClientError;

/// Result type alias using tandem-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tandem-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation, mapping or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Source/target pair is not one of the two known systems, or is not a
    /// crossing between them. Caller bug, never retried.
    #[error("Invalid direction: {source_system} to {target_system}")]
    InvalidDirection {
        source_system: String,
        target_system: String,
    },

    /// Remote system call failed
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Operation exceeded its wall-clock budget
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl Error {
    pub fn invalid_direction(source: impl ToString, target: impl ToString) -> Self {
        Self::InvalidDirection {
            source_system: source.to_string(),
            target_system: target.to_string(),
        }
    }
}
