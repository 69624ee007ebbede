//! Error types for guac-tunnel
//!
//! Centralized error handling using thiserror. Every variant maps onto a
//! Guacamole [`Status`], which decides both the status code sent to the
//! browser client and the HTTP status of a failed tunnel request.

use thiserror::Error;

use crate::protocol::Status;

/// All error types that can occur while relaying a tunnel
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Malformed wire data
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// guacd reported an error from the remote desktop
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The remote desktop could not be found
    #[error("Upstream not found: {0}")]
    UpstreamNotFound(String),

    /// guacd or the remote desktop did not respond in time
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// The remote desktop refused the connection
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The connection to guacd is closed
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The HTTP client sent a bad request
    #[error("Client error: {0}")]
    Client(String),

    /// The requested tunnel (or other resource) does not exist
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Unclassified internal failure
    #[error("Server error: {0}")]
    Server(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// The Guacamole status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            TunnelError::Upstream(_) => Status::UpstreamError,
            TunnelError::UpstreamNotFound(_) => Status::UpstreamNotFound,
            TunnelError::UpstreamTimeout(_) => Status::UpstreamTimeout,
            TunnelError::UpstreamUnavailable(_) => Status::UpstreamUnavailable,
            TunnelError::Client(_) => Status::ClientBadRequest,
            TunnelError::ResourceNotFound(_) => Status::ResourceNotFound,
            TunnelError::Protocol(_)
            | TunnelError::ConnectionClosed(_)
            | TunnelError::Server(_)
            | TunnelError::Io(_) => Status::ServerError,
        }
    }

    /// Whether the error was caused by the HTTP client and may be shown to it.
    pub fn is_client_error(&self) -> bool {
        matches!(self, TunnelError::Client(_) | TunnelError::ResourceNotFound(_))
    }

    /// Human-readable message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            TunnelError::Protocol(m)
            | TunnelError::Upstream(m)
            | TunnelError::UpstreamNotFound(m)
            | TunnelError::UpstreamTimeout(m)
            | TunnelError::UpstreamUnavailable(m)
            | TunnelError::ConnectionClosed(m)
            | TunnelError::Client(m)
            | TunnelError::ResourceNotFound(m)
            | TunnelError::Server(m) => m.clone(),
            TunnelError::Io(e) => e.to_string(),
        }
    }

    /// Builds the upstream error for a numeric status code reported by guacd.
    ///
    /// Returns `None` for codes that do not describe an upstream failure.
    pub fn from_upstream_code(code: u32, message: impl Into<String>) -> Option<Self> {
        let message = message.into();
        match Status::from_code(code)? {
            Status::UpstreamError => Some(TunnelError::Upstream(message)),
            Status::UpstreamNotFound => Some(TunnelError::UpstreamNotFound(message)),
            Status::UpstreamTimeout => Some(TunnelError::UpstreamTimeout(message)),
            Status::UpstreamUnavailable => Some(TunnelError::UpstreamUnavailable(message)),
            _ => None,
        }
    }
}

/// Result type alias for tunnel operations
pub type Result<T> = std::result::Result<T, TunnelError>;
