//! Replicant addressing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a Replicant: a name unique within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicantKey {
    /// Logical grouping, usually a bundle name.
    pub namespace: String,
    /// Name within the namespace.
    pub name: String,
}

impl ReplicantKey {
    /// Creates a key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReplicantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}
