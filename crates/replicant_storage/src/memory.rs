//! In-memory store for testing.

use crate::error::StorageResult;
use crate::store::{validate_key, ReplicantStore};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// An in-memory store.
///
/// Suitable for unit tests, integration tests and deployments where
/// nothing needs to survive a restart.
///
/// # Example
///
/// ```rust
/// use replicant_storage::{InMemoryStore, ReplicantStore};
/// use serde_json::json;
///
/// let store = InMemoryStore::new();
/// store.save("ns", "greeting", &json!("hello")).unwrap();
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<(String, String), Value>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Removes every record.
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl ReplicantStore for InMemoryStore {
    fn load(&self, namespace: &str, name: &str) -> StorageResult<Option<Value>> {
        Ok(self
            .records
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    fn save(&self, namespace: &str, name: &str, value: &Value) -> StorageResult<()> {
        validate_key(namespace, name)?;
        self.records
            .write()
            .insert((namespace.to_string(), name.to_string()), value.clone());
        Ok(())
    }

    fn remove(&self, namespace: &str, name: &str) -> StorageResult<bool> {
        Ok(self
            .records
            .write()
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some())
    }

    fn list(&self, namespace: Option<&str>) -> StorageResult<Vec<(String, String)>> {
        Ok(self
            .records
            .read()
            .keys()
            .filter(|(ns, _)| namespace.map_or(true, |wanted| wanted == ns))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.load("a", "b").unwrap(), None);
    }

    #[test]
    fn memory_save_and_load() {
        let store = InMemoryStore::new();
        store.save("game", "score", &json!(1)).unwrap();
        store.save("game", "score", &json!(2)).unwrap();

        assert_eq!(store.load("game", "score").unwrap(), Some(json!(2)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_null_is_a_value() {
        let store = InMemoryStore::new();
        store.save("game", "winner", &Value::Null).unwrap();
        assert_eq!(store.load("game", "winner").unwrap(), Some(Value::Null));
    }

    #[test]
    fn memory_remove() {
        let store = InMemoryStore::new();
        store.save("game", "score", &json!(1)).unwrap();

        assert!(store.remove("game", "score").unwrap());
        assert!(!store.remove("game", "score").unwrap());
        assert_eq!(store.load("game", "score").unwrap(), None);
    }

    #[test]
    fn memory_list_filters_namespace() {
        let store = InMemoryStore::new();
        store.save("b", "x", &json!(1)).unwrap();
        store.save("a", "y", &json!(1)).unwrap();
        store.save("a", "x", &json!(1)).unwrap();

        let all = store.list(None).unwrap();
        assert_eq!(
            all,
            vec![
                ("a".to_string(), "x".to_string()),
                ("a".to_string(), "y".to_string()),
                ("b".to_string(), "x".to_string()),
            ]
        );
        assert_eq!(store.list(Some("b")).unwrap().len(), 1);
    }

    #[test]
    fn memory_rejects_invalid_key() {
        let store = InMemoryStore::new();
        assert!(store.save("", "x", &json!(1)).is_err());
    }
}
