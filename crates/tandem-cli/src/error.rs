use std::io;

use tandem_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tandem_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid operation ID: {0}")]
    InvalidOperationId(String),
    #[error("Operation not found: {0}")]
    OperationNotFound(String),
    #[error("Mapping not found: {0}")]
    MappingNotFound(String),
    #[error("Refusing to clear the queue without --yes")]
    ConfirmationRequired,
}
