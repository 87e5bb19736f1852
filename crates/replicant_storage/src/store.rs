//! Store trait definition.

use crate::error::{StorageError, StorageResult};
use serde_json::Value;

/// A durable home for Replicant values.
///
/// Stores hold one record per `(namespace, name)`. They do not interpret the
/// value beyond JSON (de)serialization.
///
/// # Invariants
///
/// - `load` returns exactly the value of the last successful `save` for the key
/// - `save` of the same key replaces the previous record
/// - Stores must be `Send + Sync`; callers may share them across threads
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - One file per record
/// - [`super::LogStore`] - Single-file keyed log
pub trait ReplicantStore: Send + Sync {
    /// Loads the stored value for a key.
    ///
    /// Returns `Ok(None)` if nothing has been stored for the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or decoded.
    fn load(&self, namespace: &str, name: &str) -> StorageResult<Option<Value>>;

    /// Stores a value, replacing any previous record for the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn save(&self, namespace: &str, name: &str, value: &Value) -> StorageResult<()>;

    /// Removes the record for a key.
    ///
    /// Returns `true` if a record existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    fn remove(&self, namespace: &str, name: &str) -> StorageResult<bool>;

    /// Lists stored keys, optionally restricted to one namespace.
    ///
    /// Keys are returned sorted by namespace, then name.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be enumerated.
    fn list(&self, namespace: Option<&str>) -> StorageResult<Vec<(String, String)>>;
}

/// Checks that a namespace/name pair is usable as a storage key.
///
/// Both parts must be non-empty, must not be `.` or `..`, and must not
/// contain path separators or NUL bytes.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the first problem found.
pub fn validate_key(namespace: &str, name: &str) -> StorageResult<()> {
    for part in [namespace, name] {
        let reason = if part.is_empty() {
            Some("empty component")
        } else if part == "." || part == ".." {
            Some("relative path component")
        } else if part.contains(['/', '\\', '\0']) {
            Some("contains a path separator or NUL")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(StorageError::InvalidKey {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_keys() {
        assert!(validate_key("game", "score").is_ok());
        assert!(validate_key("_system", "bundles.list").is_ok());
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(validate_key("", "score").is_err());
        assert!(validate_key("game", "").is_err());
        assert!(validate_key("..", "score").is_err());
        assert!(validate_key("game", "a/b").is_err());
        assert!(validate_key("game\\x", "score").is_err());
    }
}
