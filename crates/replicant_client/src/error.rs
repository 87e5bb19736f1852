//! Error types for Replicant clients.

use replicant_protocol::{ErrorKind, PatchError, ProtocolError};
use replicant_schema::{SchemaError, Violation};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur on the client side.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The server rejected a request.
    #[error("rejected ({kind}): {reason}")]
    Rejected {
        /// Error class reported by the server.
        kind: ErrorKind,
        /// Server's explanation.
        reason: String,
    },

    /// A local mutation would violate the Replicant's schema.
    #[error("value violates schema: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Validation(Vec<Violation>),

    /// A mutation closure needs a value but the Replicant is undefined.
    #[error("replicant value is undefined")]
    Undefined,

    /// Operations did not apply to the local value.
    #[error("patch error: {0}")]
    Patch(#[from] PatchError),

    /// The schema sent by the server could not be compiled.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The proxy has been released.
    #[error("replicant proxy released")]
    Closed,
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::NotConnected => true,
            ClientError::Rejected { kind, .. } => *kind == ErrorKind::Internal,
            _ => false,
        }
    }
}
