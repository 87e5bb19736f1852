//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload is not a valid message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The message decoded but its contents are not acceptable.
    #[error("invalid message: {0}")]
    Invalid(String),
}

/// Errors that can occur while applying operations to a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The operation needs a location inside the value but has an empty path.
    #[error("{kind} operation requires a non-empty path")]
    EmptyPath {
        /// Operation kind.
        kind: &'static str,
    },

    /// The operation addresses a value that is undefined.
    #[error("cannot apply {kind} to an undefined value")]
    Undefined {
        /// Operation kind.
        kind: &'static str,
    },

    /// Nothing exists at the path.
    #[error("no value at {path}")]
    NotFound {
        /// JSON pointer of the missing location.
        path: String,
    },

    /// A value already exists where an `add` wants to create one.
    #[error("value already exists at {path}")]
    AlreadyExists {
        /// JSON pointer of the location.
        path: String,
    },

    /// The container at the path has the wrong type for the operation.
    #[error("expected {expected} at {path}")]
    TypeMismatch {
        /// JSON pointer of the location.
        path: String,
        /// Expected container type.
        expected: &'static str,
    },

    /// An array index or splice range falls outside the array.
    #[error("index {index} out of bounds at {path} (length {len})")]
    OutOfBounds {
        /// JSON pointer of the array.
        path: String,
        /// Offending index.
        index: usize,
        /// Array length.
        len: usize,
    },

    /// An update inside the value did not carry a new value.
    #[error("update at {path} has no new value")]
    MissingValue {
        /// JSON pointer of the location.
        path: String,
    },
}
