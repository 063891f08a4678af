//! Error types for CLI operations

use bootmcp_transport::TransportError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Transport layer errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Get user-friendly suggestions for resolving the error
    pub fn suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Transport(TransportError::Configuration(_)) => vec![
                "Check the configuration file syntax and field names",
                "Run `bootmcp config` to print the effective configuration",
            ],
            Self::Transport(TransportError::Io(_)) => vec![
                "Check that the port is free and the host resolves",
                "Use --port to pick a different port",
            ],
            _ => vec![],
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
