//! Transport error types

use thiserror::Error;

/// Errors that can occur on a serial link
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Port is not tracked, or its handle has been closed
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// No line came back before the read deadline
    #[error("No response from {0}")]
    NoResponse(String),

    /// The TEST probe was not answered with an accepted greeting
    #[error("Handshake failed on {port}: {}", response.as_deref().unwrap_or("no response"))]
    HandshakeFailed {
        port: String,
        response: Option<String>,
    },

    /// The OS refused to open the port
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    /// Write/read failure on an open port
    #[error("I/O error on {port}: {message}")]
    Io { port: String, message: String },

    /// Command text would break line framing
    #[error("Invalid command: {0:?}")]
    InvalidCommand(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    pub(crate) fn io(port: &str, err: &std::io::Error) -> Self {
        TransportError::Io {
            port: port.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for TransportError {
    fn from(e: tokio::task::JoinError) -> Self {
        TransportError::Internal(format!("blocking serial task failed: {e}"))
    }
}
