//! Error types for the Replicant server.

use crate::handle::ClientHandle;
use replicant_protocol::{ErrorKind, PatchError, ReplicantKey};
use replicant_schema::{SchemaError, Violation};
use replicant_storage::StorageError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the Replicant server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The value would violate the Replicant's schema.
    #[error("value violates schema: {}", describe(.violations))]
    Validation {
        /// Every violation found.
        violations: Vec<Violation>,
    },

    /// The mutation was based on an outdated revision.
    #[error("stale revision: expected {expected}, current is {actual}")]
    StaleRevision {
        /// Revision the client based its mutation on.
        expected: u64,
        /// Authoritative revision.
        actual: u64,
    },

    /// An earlier mutation from the same connection was rejected; the
    /// connection must declare again before mutating.
    #[error("an earlier mutation was rejected; declare again (current revision {revision})")]
    ResyncRequired {
        /// Authoritative revision.
        revision: u64,
    },

    /// The Replicant has not been declared.
    #[error("unknown replicant: {0}")]
    UnknownReplicant(ReplicantKey),

    /// The request is malformed or exceeds limits.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The schema could not be resolved or compiled.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The operations do not apply to the current value.
    #[error("operations do not apply: {0}")]
    Patch(#[from] PatchError),

    /// The persistence layer failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// A message could not be delivered to a connection.
    #[error("transport error for {handle}: {reason}")]
    Transport {
        /// Target connection.
        handle: ClientHandle,
        /// Description of the failure.
        reason: String,
    },

    /// The Replicant is still loading.
    #[error("replicant {0} is not ready")]
    NotReady(ReplicantKey),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ServerError {
    /// Returns the wire classification of this error.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ServerError::Validation { .. } => ErrorKind::Validation,
            ServerError::StaleRevision { .. } | ServerError::ResyncRequired { .. } => {
                ErrorKind::StaleRevision
            }
            ServerError::UnknownReplicant(_) => ErrorKind::UnknownReplicant,
            ServerError::InvalidRequest(_) | ServerError::Patch(_) => ErrorKind::InvalidRequest,
            ServerError::Schema(_) => ErrorKind::Schema,
            ServerError::Persistence(_)
            | ServerError::Transport { .. }
            | ServerError::NotReady(_)
            | ServerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the request was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::Validation { .. }
                | ServerError::StaleRevision { .. }
                | ServerError::ResyncRequired { .. }
                | ServerError::UnknownReplicant(_)
                | ServerError::InvalidRequest(_)
                | ServerError::Schema(_)
                | ServerError::Patch(_)
        )
    }

    /// Returns true if the server was at fault.
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(ServerError::Persistence(StorageError::Closed).is_server_error());
    }

    #[test]
    fn error_kinds() {
        let stale = ServerError::StaleRevision {
            expected: 0,
            actual: 1,
        };
        assert_eq!(stale.error_kind(), ErrorKind::StaleRevision);
        let resync = ServerError::ResyncRequired { revision: 3 };
        assert_eq!(resync.error_kind(), ErrorKind::StaleRevision);
        assert!(resync.is_client_error());
        assert_eq!(
            ServerError::Patch(PatchError::EmptyPath { kind: "add" }).error_kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            ServerError::NotReady(ReplicantKey::new("a", "b")).error_kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn error_display() {
        let err = ServerError::Validation {
            violations: vec![
                Violation {
                    pointer: "/home".into(),
                    message: "\"x\" is not of type \"integer\"".into(),
                },
                Violation {
                    pointer: String::new(),
                    message: "\"away\" is a required property".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("/home: "));
        assert!(msg.contains("(root): "));
    }
}
