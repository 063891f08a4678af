//! Transport error types.

use axum::http::StatusCode;
use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur while serving sessions.
///
/// Every variant except [`TransportError::Internal`] is recoverable at the
/// ingress boundary and is surfaced as a per-request error response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// A session with this identifier is already registered.
    #[error("Duplicate session identifier: {0}")]
    DuplicateIdentifier(String),

    /// No live session is registered under this identifier.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session was terminated before the message could be delivered.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// A frame was sent on a channel that is closing or closed.
    #[error("Channel closed")]
    ChannelClosed,

    /// An inbound message did not carry a session identifier.
    #[error("Missing session identifier")]
    MissingSessionId,

    /// Inbound payload exceeds the configured maximum.
    #[error("Payload size ({size} bytes) exceeds maximum allowed ({max} bytes)")]
    PayloadTooLarge {
        /// The actual size of the payload in bytes
        size: usize,
        /// The maximum allowed size in bytes
        max: usize,
    },

    /// The frame cannot be carried by the underlying stream.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The transport no longer accepts new sessions.
    #[error("Transport is shutting down")]
    ShuttingDown,

    /// The remote end of the stream went away.
    #[error("Peer disconnected")]
    Disconnected,

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The protocol engine failed to process a message.
    #[error("Engine error: {0}")]
    Engine(String),

    /// An internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Create an engine error from any displayable value.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Whether the message could not be delivered because its session is gone.
    ///
    /// Unknown and already-terminated sessions are indistinguishable to callers.
    pub fn is_undeliverable(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::SessionClosed(_))
    }

    /// Whether this error means the peer is gone and the channel must be torn down.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Io(_))
    }

    /// HTTP status used when this error is reported to an inbound caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) | Self::SessionClosed(_) => StatusCode::NOT_FOUND,
            Self::MissingSessionId | Self::InvalidFrame(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::ChannelClosed | Self::Disconnected => StatusCode::GONE,
            Self::DuplicateIdentifier(_)
            | Self::Io(_)
            | Self::Configuration(_)
            | Self::Engine(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<config::ConfigError> for TransportError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
