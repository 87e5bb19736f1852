//! Error types for schema handling.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while locating, loading or compiling a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The `$schema` URI names a draft that is not supported.
    #[error("unsupported schema draft: {0}")]
    UnsupportedDraft(String),

    /// The schema document itself is not a valid schema.
    #[error("invalid schema: {0}")]
    Invalid(String),

    /// An explicitly requested schema file does not exist.
    #[error("schema file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// An explicit schema path points outside the bundle directory.
    #[error("schema path escapes the bundle directory: {}", .0.display())]
    OutsideRoot(PathBuf),

    /// The schema file could not be read.
    #[error("failed to read schema {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The schema file is not valid JSON.
    #[error("failed to parse schema {}: {source}", path.display())]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Both the schema and the caller supplied a default value.
    #[error("schema defines a default and an explicit default value was also given")]
    ConflictingDefault,
}
