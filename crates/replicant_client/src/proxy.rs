//! Client-side mirror of one Replicant.
//!
//! A [`ReplicantProxy`] holds the latest value it knows, applies local
//! mutations optimistically and reconciles with the server as changes,
//! acknowledgements and rejections arrive.
//!
//! # Revisions
//!
//! The proxy keeps two values: the last one confirmed by the server and the
//! visible one, which also reflects mutations still in flight. A mutation is
//! sent against the confirmed revision plus the number of outstanding
//! mutations, so a burst of local edits is accepted in order.
//!
//! Incoming changes are applied only in revision order:
//!
//! - a revision at or below the confirmed one is a duplicate and is ignored
//! - the next revision applies its operations to the confirmed value
//! - a later revision means changes were missed, and the full value is adopted
//!
//! Anything sent after a rejected mutation was computed from a value the
//! server never had, and the server refuses it. A rejection therefore puts the
//! proxy back into [`ProxyStatus::Declaring`]; mutations made meanwhile are
//! deferred and replayed on the fresh snapshot.
//!
//! Mutations are sent in the order they were prepared, even when several
//! threads mutate the same proxy.

use crate::client::ClientInner;
use crate::error::{ClientError, ClientResult};
use crate::pending::{PendingStats, PendingTracker};
use crate::transport::ClientTransport;
use parking_lot::Mutex;
use replicant_protocol::{apply_operations, diff, ClientMessage, ErrorKind, ReplicantKey, ServerMessage};
use replicant_schema::{CompiledSchema, Violation};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Options sent with a declare.
#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    /// Value to use when nothing is persisted and the schema has no default.
    pub default_value: Option<Value>,
    /// Schema file relative to the namespace directory on the server.
    pub schema_path: Option<String>,
    /// Whether the server keeps the value across restarts.
    pub persistent: Option<bool>,
}

impl ProxyOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default value.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Sets the schema path.
    pub fn with_schema_path(mut self, path: impl Into<String>) -> Self {
        self.schema_path = Some(path.into());
        self
    }

    /// Sets persistence.
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = Some(persistent);
        self
    }
}

/// Lifecycle of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    /// Waiting for a snapshot from the server.
    Declaring,
    /// In sync; mutations are sent immediately.
    Ready,
    /// The connection was lost; mutations are deferred until resubscribed.
    Stale,
}

/// What caused a proxy's value to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// A local mutation, applied optimistically.
    Local,
    /// A change broadcast by the server.
    Remote,
    /// A snapshot answering a declare.
    Snapshot,
    /// A local mutation was rejected and undone.
    Rollback,
}

/// A change to a proxy's visible value.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyChange {
    /// Replicant that changed.
    pub key: ReplicantKey,
    /// Value after the change.
    pub value: Option<Value>,
    /// Value before the change.
    pub old_value: Option<Value>,
    /// Confirmed revision at the time of the change.
    pub revision: u64,
    /// What caused it.
    pub source: ChangeSource,
}

/// Identifies a change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked when a proxy's visible value changes.
pub type ChangeListener = Arc<dyn Fn(&ProxyChange) + Send + Sync>;

type UpdateFn = Box<dyn FnOnce(&mut Value) + Send>;

enum Mutation {
    Assign(Option<Value>),
    Update(UpdateFn),
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Assign(value) => f.debug_tuple("Assign").field(value).finish(),
            Mutation::Update(_) => f.write_str("Update(..)"),
        }
    }
}

struct Prepared {
    request_id: u64,
    message: ClientMessage,
    change: ProxyChange,
}

/// A message to send once the state lock is released.
struct Outgoing {
    request_id: Option<u64>,
    message: ClientMessage,
}

#[derive(Debug)]
struct ProxyState {
    status: ProxyStatus,
    synced: bool,
    released: bool,
    value: Option<Value>,
    confirmed: Option<Value>,
    revision: u64,
    schema: Option<Arc<CompiledSchema>>,
    pending: PendingTracker,
    deferred: Vec<Mutation>,
    last_error: Option<(ErrorKind, String)>,
}

/// State shared by every handle to one proxy.
pub(crate) struct ProxyShared {
    key: ReplicantKey,
    options: ProxyOptions,
    /// Held from preparing a message until it is handed to the transport.
    /// Always taken before `state`.
    send_order: Mutex<()>,
    state: Mutex<ProxyState>,
    listeners: Mutex<Vec<(ListenerId, ChangeListener)>>,
    next_listener: AtomicU64,
}

impl ProxyShared {
    pub(crate) fn new(key: ReplicantKey, options: ProxyOptions) -> Self {
        Self {
            key,
            options,
            send_order: Mutex::new(()),
            state: Mutex::new(ProxyState {
                status: ProxyStatus::Declaring,
                synced: false,
                released: false,
                value: None,
                confirmed: None,
                revision: 0,
                schema: None,
                pending: PendingTracker::new(),
                deferred: Vec::new(),
                last_error: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub(crate) fn declare_message(&self) -> ClientMessage {
        ClientMessage::Declare {
            namespace: self.key.namespace.clone(),
            name: self.key.name.clone(),
            default_value: self.options.default_value.clone(),
            schema_path: self.options.schema_path.clone(),
            persistent: self.options.persistent,
        }
    }

    /// Marks the proxy stale after the connection dropped.
    pub(crate) fn mark_stale(&self) {
        let mut state = self.state.lock();
        if !state.released {
            state.status = ProxyStatus::Stale;
        }
    }

    fn notify(&self, change: &ProxyChange) {
        let listeners: Vec<ChangeListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(change);
        }
    }
}

impl fmt::Debug for ProxyShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyShared")
            .field("key", &self.key)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl ProxyState {
    fn prepare<T: ClientTransport>(
        &mut self,
        key: &ReplicantKey,
        mutation: Mutation,
        client: &ClientInner<T>,
    ) -> ClientResult<Option<Prepared>> {
        let old = self.value.clone();
        let (new, as_operations) = match mutation {
            Mutation::Assign(value) => (value, false),
            Mutation::Update(update) => {
                let mut value = old.clone().ok_or(ClientError::Undefined)?;
                update(&mut value);
                (Some(value), true)
            }
        };
        if new == old {
            return Ok(None);
        }

        if client.config.validate_locally {
            if let Some(schema) = &self.schema {
                match &new {
                    Some(value) => schema.validate(value).map_err(ClientError::Validation)?,
                    None => {
                        return Err(ClientError::Validation(vec![Violation {
                            pointer: String::new(),
                            message: "value is undefined".into(),
                        }]))
                    }
                }
            }
        }

        let expected = self.revision + self.pending.outstanding() as u64;
        let request_id = client.next_request_id();
        let message = if as_operations {
            ClientMessage::Operations {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                operations: diff(old.as_ref(), new.as_ref()),
                expected_revision: expected,
                request_id: Some(request_id),
            }
        } else {
            ClientMessage::Assign {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                value: new.clone(),
                revision: expected,
                request_id: Some(request_id),
            }
        };

        self.pending.track(request_id, new.clone());
        self.value = new.clone();
        trace!(%key, request_id, expected, "prepared local mutation");

        Ok(Some(Prepared {
            request_id,
            message,
            change: ProxyChange {
                key: key.clone(),
                value: new,
                old_value: old,
                revision: self.revision,
                source: ChangeSource::Local,
            },
        }))
    }

    /// Points the visible value at the newest prediction, or the confirmed
    /// value when nothing is outstanding.
    fn reconcile(&mut self, key: &ReplicantKey, source: ChangeSource) -> Option<ProxyChange> {
        let target = match self.pending.predicted() {
            Some(predicted) => predicted.cloned(),
            None => self.confirmed.clone(),
        };
        if target == self.value {
            return None;
        }
        let old_value = std::mem::replace(&mut self.value, target);
        Some(ProxyChange {
            key: key.clone(),
            value: self.value.clone(),
            old_value,
            revision: self.revision,
            source,
        })
    }

    fn apply_snapshot<T: ClientTransport>(
        &mut self,
        key: &ReplicantKey,
        value: Option<Value>,
        revision: u64,
        schema: Option<Value>,
        client: &ClientInner<T>,
    ) -> (Vec<ProxyChange>, Vec<Outgoing>) {
        self.schema = match schema {
            Some(document) if client.config.validate_locally => match CompiledSchema::compile(&document) {
                Ok(compiled) => Some(Arc::new(compiled)),
                Err(e) => {
                    warn!(%key, error = %e, "server schema did not compile; validating on the server only");
                    None
                }
            },
            _ => None,
        };

        let old_value = std::mem::replace(&mut self.value, value.clone());
        self.confirmed = value;
        self.revision = revision;
        self.pending.clear();
        self.status = ProxyStatus::Ready;
        let first = !self.synced;
        self.synced = true;
        debug!(%key, revision, "snapshot received");

        let mut changes = Vec::new();
        if first || old_value != self.value {
            changes.push(ProxyChange {
                key: key.clone(),
                value: self.value.clone(),
                old_value,
                revision,
                source: ChangeSource::Snapshot,
            });
        }

        let mut outgoing = Vec::new();
        let deferred = std::mem::take(&mut self.deferred);
        if !deferred.is_empty() {
            debug!(%key, count = deferred.len(), "replaying deferred mutations");
        }
        for mutation in deferred {
            match self.prepare(key, mutation, client) {
                Ok(Some(prepared)) => {
                    changes.push(prepared.change);
                    outgoing.push(Outgoing {
                        request_id: Some(prepared.request_id),
                        message: prepared.message,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(%key, error = %e, "dropping deferred mutation"),
            }
        }
        (changes, outgoing)
    }

    fn apply_change(
        &mut self,
        key: &ReplicantKey,
        value: Option<Value>,
        revision: u64,
        operations: &[replicant_protocol::Operation],
        request_id: Option<u64>,
    ) -> Option<ProxyChange> {
        if !self.synced {
            trace!(%key, revision, "change before snapshot ignored");
            return None;
        }
        if revision <= self.revision {
            debug!(%key, revision, current = self.revision, "discarding duplicate change");
            return None;
        }

        let next = if revision == self.revision + 1 {
            let mut patched = self.confirmed.clone();
            match apply_operations(&mut patched, operations) {
                Ok(()) if patched == value => patched,
                Ok(()) => {
                    warn!(%key, revision, "operations disagree with broadcast value; adopting value");
                    value
                }
                Err(e) => {
                    warn!(%key, revision, error = %e, "operations did not apply; adopting value");
                    value
                }
            }
        } else {
            debug!(%key, revision, current = self.revision, "revision gap; adopting full value");
            value
        };
        self.confirmed = next;
        self.revision = revision;

        let acknowledged = request_id.and_then(|id| {
            self.pending
                .acknowledge(id, self.confirmed.as_ref())
                .map(|state| (id, state))
        });
        match acknowledged {
            Some((id, state)) => debug!(%key, request_id = id, ?state, "mutation acknowledged"),
            None => {
                let superseded = self.pending.supersede_all();
                if superseded > 0 {
                    debug!(%key, superseded, "remote change superseded local mutations");
                }
            }
        }

        let source = if request_id.is_some() {
            ChangeSource::Local
        } else {
            ChangeSource::Remote
        };
        self.reconcile(key, source)
    }

    fn apply_rejection(
        &mut self,
        key: &ReplicantKey,
        shared: &ProxyShared,
        request_id: Option<u64>,
        kind: ErrorKind,
        reason: String,
    ) -> (Vec<ProxyChange>, Vec<Outgoing>) {
        let mut changes = Vec::new();
        let mut outgoing = Vec::new();

        let tracked = match request_id {
            Some(id) => {
                let tracked = self.pending.reject(id);
                if tracked {
                    debug!(%key, request_id = id, %kind, %reason, "mutation rejected");
                }
                tracked
            }
            None => {
                warn!(%key, %kind, %reason, "request rejected");
                false
            }
        };
        self.last_error = Some((kind, reason));

        if let Some(change) = self.reconcile(key, ChangeSource::Rollback) {
            changes.push(change);
        }

        if (tracked || kind == ErrorKind::StaleRevision) && self.status == ProxyStatus::Ready {
            debug!(%key, %kind, "requesting a fresh snapshot");
            self.status = ProxyStatus::Declaring;
            outgoing.push(Outgoing {
                request_id: None,
                message: shared.declare_message(),
            });
        }
        (changes, outgoing)
    }
}

/// Handle to a client-side Replicant.
///
/// Cheap to clone; every clone observes the same state.
pub struct ReplicantProxy<T: ClientTransport> {
    client: Arc<ClientInner<T>>,
    shared: Arc<ProxyShared>,
}

impl<T: ClientTransport> Clone for ReplicantProxy<T> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: ClientTransport> fmt::Debug for ReplicantProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicantProxy")
            .field("shared", &self.shared)
            .finish()
    }
}

impl<T: ClientTransport> ReplicantProxy<T> {
    pub(crate) fn from_parts(client: Arc<ClientInner<T>>, shared: Arc<ProxyShared>) -> Self {
        Self { client, shared }
    }

    /// Returns the Replicant's key.
    pub fn key(&self) -> &ReplicantKey {
        &self.shared.key
    }

    /// Returns the visible value, including optimistic mutations.
    pub fn value(&self) -> Option<Value> {
        self.shared.state.lock().value.clone()
    }

    /// Returns the last value confirmed by the server.
    pub fn confirmed_value(&self) -> Option<Value> {
        self.shared.state.lock().confirmed.clone()
    }

    /// Returns the last confirmed revision.
    pub fn revision(&self) -> u64 {
        self.shared.state.lock().revision
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> ProxyStatus {
        self.shared.state.lock().status
    }

    /// Returns true once a snapshot has arrived and the connection is up.
    pub fn is_ready(&self) -> bool {
        self.status() == ProxyStatus::Ready
    }

    /// Returns the schema the server reported, if local validation is on.
    pub fn schema(&self) -> Option<Arc<CompiledSchema>> {
        self.shared.state.lock().schema.clone()
    }

    /// Number of sent mutations not yet acknowledged.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.outstanding()
    }

    /// Counters for acknowledged and rejected mutations.
    pub fn pending_stats(&self) -> PendingStats {
        self.shared.state.lock().pending.stats()
    }

    /// Number of mutations waiting for the next snapshot.
    pub fn deferred_count(&self) -> usize {
        self.shared.state.lock().deferred.len()
    }

    /// Returns the most recent rejection.
    pub fn last_error(&self) -> Option<ClientError> {
        self.shared
            .state
            .lock()
            .last_error
            .clone()
            .map(|(kind, reason)| ClientError::Rejected { kind, reason })
    }

    #[cfg(test)]
    pub(crate) fn pending_state(&self, request_id: u64) -> Option<crate::pending::PendingState> {
        self.shared.state.lock().pending.state(request_id)
    }

    /// Replaces the value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if the value violates the schema,
    /// a transport error if it could not be sent (the local value is rolled
    /// back), or [`ClientError::Closed`] after [`release`](Self::release).
    pub fn set(&self, value: Value) -> ClientResult<()> {
        self.mutate(Mutation::Assign(Some(value)))
    }

    /// Replaces the value, where `None` makes it undefined.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub fn assign(&self, value: Option<Value>) -> ClientResult<()> {
        self.mutate(Mutation::Assign(value))
    }

    /// Edits the value in place; the edit is sent as operations.
    ///
    /// Before the first snapshot, or while stale, the closure is kept and
    /// run against the next snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Undefined`] if the value is undefined, plus the
    /// errors of [`set`](Self::set).
    pub fn update<F>(&self, update: F) -> ClientResult<()>
    where
        F: FnOnce(&mut Value) + Send + 'static,
    {
        self.mutate(Mutation::Update(Box::new(update)))
    }

    /// Registers a listener for changes to the visible value.
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ProxyChange) + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns true if it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Stops mirroring this Replicant and unsubscribes from the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the unsubscribe could not be sent. The proxy is
    /// released either way.
    pub fn release(&self) -> ClientResult<()> {
        let _order = self.shared.send_order.lock();
        {
            let mut state = self.shared.state.lock();
            if state.released {
                return Ok(());
            }
            state.released = true;
            state.deferred.clear();
        }
        self.client.forget(&self.shared.key);

        if !self.client.transport.is_connected() {
            return Ok(());
        }
        self.client.send(ClientMessage::Unsubscribe {
            namespace: self.shared.key.namespace.clone(),
            name: self.shared.key.name.clone(),
        })
    }

    /// Sends the declare again after a reconnect.
    pub(crate) fn resubscribe(&self) -> ClientResult<()> {
        let _order = self.shared.send_order.lock();
        {
            let mut state = self.shared.state.lock();
            if state.released {
                return Ok(());
            }
            state.status = ProxyStatus::Declaring;
        }
        self.client.send(self.shared.declare_message())
    }

    /// Feeds one server message addressed to this Replicant.
    pub(crate) fn receive(&self, message: ServerMessage) {
        let key = &self.shared.key;
        let order = self.shared.send_order.lock();
        let (mut changes, outgoing) = {
            let mut state = self.shared.state.lock();
            if state.released {
                return;
            }
            match message {
                ServerMessage::Declared {
                    value,
                    revision,
                    schema,
                    ..
                } => state.apply_snapshot(key, value, revision, schema, &*self.client),
                ServerMessage::Change {
                    value,
                    revision,
                    operations,
                    request_id,
                    ..
                } => (
                    state
                        .apply_change(key, value, revision, &operations, request_id)
                        .into_iter()
                        .collect(),
                    Vec::new(),
                ),
                ServerMessage::Error {
                    request_id,
                    kind,
                    reason,
                    ..
                } => state.apply_rejection(key, &self.shared, request_id, kind, reason),
                ServerMessage::Value { revision, .. } => {
                    trace!(%key, revision, "read reply ignored by proxy");
                    (Vec::new(), Vec::new())
                }
            }
        };

        self.dispatch(outgoing, &mut changes);
        drop(order);

        for change in &changes {
            self.shared.notify(change);
        }
    }

    fn mutate(&self, mutation: Mutation) -> ClientResult<()> {
        let order = self.shared.send_order.lock();
        let prepared = {
            let mut state = self.shared.state.lock();
            if state.released {
                return Err(ClientError::Closed);
            }
            if state.status == ProxyStatus::Ready && !self.client.transport.is_connected() {
                state.status = ProxyStatus::Stale;
            }
            if state.status != ProxyStatus::Ready {
                debug!(key = %self.shared.key, status = ?state.status, "deferring mutation");
                state.deferred.push(mutation);
                return Ok(());
            }
            state.prepare(&self.shared.key, mutation, &*self.client)?
        };

        let Some(Prepared {
            request_id,
            message,
            change,
        }) = prepared
        else {
            return Ok(());
        };
        let mut changes = vec![change];
        let result = self.send_tracked(request_id, message, &mut changes);
        drop(order);

        for change in &changes {
            self.shared.notify(change);
        }
        result
    }

    /// Sends queued messages. Must be called with `send_order` held.
    fn dispatch(&self, outgoing: Vec<Outgoing>, changes: &mut Vec<ProxyChange>) {
        for Outgoing { request_id, message } in outgoing {
            let result = match request_id {
                Some(id) => self.send_tracked(id, message, changes),
                None => self.client.send(message),
            };
            if let Err(e) = result {
                warn!(key = %self.shared.key, error = %e, "send failed");
            }
        }
    }

    /// Sends a tracked mutation, undoing it locally if the send fails.
    ///
    /// Must be called with `send_order` held. The rollback, if any, is
    /// appended to `changes` for the caller to announce.
    fn send_tracked(&self, request_id: u64, message: ClientMessage, changes: &mut Vec<ProxyChange>) -> ClientResult<()> {
        let Err(e) = self.client.send(message) else {
            return Ok(());
        };

        let mut state = self.shared.state.lock();
        state.pending.reject(request_id);
        if !e.is_retryable() {
            state.last_error = Some((ErrorKind::Internal, e.to_string()));
        }
        changes.extend(state.reconcile(&self.shared.key, ChangeSource::Rollback));
        Err(e)
    }
}
