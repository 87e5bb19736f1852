//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A namespace or name cannot be used as a storage key.
    #[error("invalid key {namespace:?}/{name:?}: {reason}")]
    InvalidKey {
        /// The namespace component.
        namespace: String,
        /// The name component.
        name: String,
        /// Why the key was refused.
        reason: &'static str,
    },

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The store or writer has been shut down.
    #[error("storage is closed")]
    Closed,
}
