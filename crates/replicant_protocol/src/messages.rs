//! Messages exchanged between clients and the server.
//!
//! Every message is a JSON object with a `type` discriminator and camelCase
//! fields. A Replicant value that is undefined is an absent `value` field;
//! JSON `null` is sent as `null`.

use crate::error::{ProtocolError, ProtocolResult};
use crate::key::ReplicantKey;
use crate::operation::Operation;
use crate::value::present;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A message sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Registers interest in a Replicant, creating it if needed.
    ///
    /// Answered with [`ServerMessage::Declared`].
    Declare {
        /// Namespace.
        namespace: String,
        /// Name.
        name: String,
        /// Value to use when nothing is persisted and the schema has no default.
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
        default_value: Option<Value>,
        /// Schema file, relative to the namespace's directory.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema_path: Option<String>,
        /// Whether the value survives restarts. Server default applies when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        persistent: Option<bool>,
    },
    /// Replaces the whole value.
    Assign {
        /// Namespace.
        namespace: String,
        /// Name.
        name: String,
        /// New value; absent means undefined.
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
        value: Option<Value>,
        /// Revision the client based this assignment on.
        revision: u64,
        /// Correlation id echoed back to this client only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    /// Applies incremental operations.
    Operations {
        /// Namespace.
        namespace: String,
        /// Name.
        name: String,
        /// Operations to apply in order.
        operations: Vec<Operation>,
        /// Revision the operations were computed against.
        expected_revision: u64,
        /// Correlation id echoed back to this client only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    /// Requests the current value without subscribing.
    Read {
        /// Namespace.
        namespace: String,
        /// Name.
        name: String,
    },
    /// Stops receiving changes for a Replicant.
    Unsubscribe {
        /// Namespace.
        namespace: String,
        /// Name.
        name: String,
    },
}

impl ClientMessage {
    /// Returns the key of the Replicant this message addresses.
    pub fn key(&self) -> ReplicantKey {
        match self {
            ClientMessage::Declare { namespace, name, .. }
            | ClientMessage::Assign { namespace, name, .. }
            | ClientMessage::Operations { namespace, name, .. }
            | ClientMessage::Read { namespace, name }
            | ClientMessage::Unsubscribe { namespace, name } => {
                ReplicantKey::new(namespace.clone(), name.clone())
            }
        }
    }

    /// Returns the correlation id, if the message carries one.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ClientMessage::Assign { request_id, .. } | ClientMessage::Operations { request_id, .. } => {
                *request_id
            }
            _ => None,
        }
    }

    /// Encodes to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid client message.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let message: Self = serde_json::from_str(text)?;
        let key = message.key();
        if key.namespace.is_empty() || key.name.is_empty() {
            return Err(ProtocolError::Invalid(
                "namespace and name must be non-empty".into(),
            ));
        }
        Ok(message)
    }
}

/// Classification of a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The value would violate the Replicant's schema.
    Validation,
    /// The request was based on an outdated revision; re-declare to resync.
    StaleRevision,
    /// The Replicant has not been declared.
    UnknownReplicant,
    /// The request could not be understood.
    InvalidRequest,
    /// The schema could not be located or compiled.
    Schema,
    /// The server failed for reasons unrelated to the request.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::StaleRevision => "staleRevision",
            ErrorKind::UnknownReplicant => "unknownReplicant",
            ErrorKind::InvalidRequest => "invalidRequest",
            ErrorKind::Schema => "schema",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// A message sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Snapshot answering a declare; the client is now subscribed.
    Declared {
        /// Namespace.
        namespace: String,
        /// Name.
        name: String,
        /// Current value.
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
        value: Option<Value>,
        /// Current revision.
        revision: u64,
        /// Schema document, if the Replicant has one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
    },
    /// An accepted mutation, broadcast to every subscriber.
    Change {
        /// Namespace.
        namespace: String,
        /// Name.
        name: String,
        /// Value after the change.
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
        value: Option<Value>,
        /// Revision after the change.
        revision: u64,
        /// Operations transforming the previous revision's value into `value`.
        operations: Vec<Operation>,
        /// Present only in the copy sent to the client that made the change.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    /// Reply to a read.
    Value {
        /// Namespace.
        namespace: String,
        /// Name.
        name: String,
        /// Current value.
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
        value: Option<Value>,
        /// Current revision.
        revision: u64,
    },
    /// A rejected request. Sent to the requesting client only.
    Error {
        /// Namespace, if the request addressed a Replicant.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        /// Name, if the request addressed a Replicant.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Correlation id of the rejected request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        /// Error class.
        kind: ErrorKind,
        /// Human-readable reason.
        reason: String,
        /// Authoritative revision, for stale-revision rejections.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<u64>,
    },
}

impl ServerMessage {
    /// Returns the key of the Replicant this message concerns, if any.
    pub fn key(&self) -> Option<ReplicantKey> {
        match self {
            ServerMessage::Declared { namespace, name, .. }
            | ServerMessage::Change { namespace, name, .. }
            | ServerMessage::Value { namespace, name, .. } => {
                Some(ReplicantKey::new(namespace.clone(), name.clone()))
            }
            ServerMessage::Error {
                namespace: Some(namespace),
                name: Some(name),
                ..
            } => Some(ReplicantKey::new(namespace.clone(), name.clone())),
            ServerMessage::Error { .. } => None,
        }
    }

    /// Encodes to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid server message.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
