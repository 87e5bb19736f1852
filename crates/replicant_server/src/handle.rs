//! Connection identities.

use std::fmt;
use uuid::Uuid;

/// Identifies one client connection.
///
/// Handles are random and never reused, so a message addressed to a handle
/// that has disconnected cannot reach a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientHandle(Uuid);

impl ClientHandle {
    /// Creates a fresh random handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing identifier.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying identifier.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClientHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0.simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let a = ClientHandle::new();
        let b = ClientHandle::new();
        assert_ne!(a, b);
        assert_eq!(ClientHandle::from_uuid(a.as_uuid()), a);
        assert!(a.to_string().starts_with("client-"));
    }
}
