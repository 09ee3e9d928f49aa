//! Client error types.

use luawire_protocol::FramingError;
use std::sync::Arc;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("connection to {addr} refused")]
    Refused {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("connection closed")]
    ConnectionClosed,

    /// The read loop died earlier; carries the error that killed it.
    #[error("connection failed: {0}")]
    ConnectionFailed(Arc<ClientError>),

    /// The connection went away before the reply to request `id` arrived.
    #[error("request {id} cancelled: connection lost before reply")]
    Cancelled { id: u64 },

    #[error("host timed out running `{command}`")]
    RemoteTimeout { command: String },

    #[error("host failed to run `{command}`: {message}")]
    RemoteError { command: String, message: String },

    #[error("connection self-test failed: {0}")]
    SelfTestFailed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("waiting for host readiness failed: {0}")]
    Ready(String),

    #[error("connect timeout")]
    Timeout,
}

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The incoming byte stream could not be cut into frames.
    Framing,
    /// The transport could not be opened or is gone.
    Connection,
    /// The host answered, but not with a usable result.
    Protocol,
    /// A pending request was abandoned because its connection failed.
    Cancelled,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Framing(_) => ErrorKind::Framing,
            ClientError::Cancelled { .. } => ErrorKind::Cancelled,
            ClientError::RemoteTimeout { .. }
            | ClientError::RemoteError { .. }
            | ClientError::SelfTestFailed(_)
            | ClientError::Json(_) => ErrorKind::Protocol,
            ClientError::Io(_)
            | ClientError::Refused { .. }
            | ClientError::NotConnected
            | ClientError::AlreadyConnected
            | ClientError::ConnectionClosed
            | ClientError::ConnectionFailed(_)
            | ClientError::Ready(_)
            | ClientError::Timeout => ErrorKind::Connection,
        }
    }

    /// Returns whether a fresh connection attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_)
            | ClientError::Refused { .. }
            | ClientError::ConnectionClosed
            | ClientError::ConnectionFailed(_)
            | ClientError::Cancelled { .. }
            | ClientError::RemoteTimeout { .. }
            | ClientError::Timeout => true,
            _ => false,
        }
    }
}
