//! The server-side Replicant entity.

use crate::error::{ServerError, ServerResult};
use crate::handle::ClientHandle;
use replicant_protocol::{apply_operations, diff, Operation, ReplicantKey};
use replicant_schema::CompiledSchema;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lifecycle of a [`Replicant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Created, no load started.
    Uninitialized,
    /// Initial value is being fetched; mutations are queued.
    Loading,
    /// Accepting mutations.
    Ready,
}

/// A point-in-time view of a Replicant.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Replicant key.
    pub key: ReplicantKey,
    /// Current value.
    pub value: Option<Value>,
    /// Current revision.
    pub revision: u64,
    /// Schema document, if any.
    pub schema: Option<Value>,
}

/// An accepted mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Replicant key.
    pub key: ReplicantKey,
    /// Value after the change.
    pub value: Option<Value>,
    /// Value before the change.
    pub old_value: Option<Value>,
    /// Revision after the change.
    pub revision: u64,
    /// Operations transforming `old_value` into `value`.
    pub operations: Vec<Operation>,
}

/// A requested change to a Replicant's value.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Replace the whole value.
    Assign {
        /// New value.
        value: Option<Value>,
        /// Revision the change is based on; `None` skips the check.
        expected_revision: Option<u64>,
    },
    /// Apply incremental operations.
    Operations {
        /// Operations in order.
        operations: Vec<Operation>,
        /// Revision the operations were computed against; `None` skips the check.
        expected_revision: Option<u64>,
    },
}

/// A mutation together with who asked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMutation {
    /// The change.
    pub mutation: Mutation,
    /// Requesting connection, `None` for server-local callers.
    pub origin: Option<ClientHandle>,
    /// Correlation id chosen by the requester.
    pub request_id: Option<u64>,
}

/// The result of applying a [`QueuedMutation`].
#[derive(Debug)]
pub struct MutationOutcome {
    /// Requesting connection.
    pub origin: Option<ClientHandle>,
    /// Correlation id chosen by the requester.
    pub request_id: Option<u64>,
    /// The change, or why it was rejected.
    pub result: ServerResult<ChangeEvent>,
}

/// Server-side observer of accepted changes.
pub type ChangeObserver = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Identifies a registered [`ChangeObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// One named value and its synchronization state.
///
/// A `Replicant` knows nothing about transports: accepted mutations produce a
/// [`ChangeEvent`] and it is the caller's job to broadcast it to
/// [`listeners`](Replicant::listeners).
///
/// # Invariants
///
/// - `revision` increases by exactly one per accepted mutation
/// - with a schema, `value` always satisfies it after an accepted mutation
/// - a rejected mutation changes neither `value` nor `revision`
/// - once a connection's mutation is rejected, its later mutations are
///   rejected too until it subscribes again
pub struct Replicant {
    key: ReplicantKey,
    value: Option<Value>,
    revision: u64,
    schema: Option<Arc<CompiledSchema>>,
    persistent: bool,
    state: LoadState,
    queue: VecDeque<QueuedMutation>,
    listeners: HashSet<ClientHandle>,
    blocked: HashSet<ClientHandle>,
    observers: Vec<(ObserverId, ChangeObserver)>,
    next_observer: u64,
}

impl Replicant {
    /// Creates an uninitialized Replicant.
    pub fn new(key: ReplicantKey, schema: Option<Arc<CompiledSchema>>, persistent: bool) -> Self {
        Self {
            key,
            value: None,
            revision: 0,
            schema,
            persistent,
            state: LoadState::Uninitialized,
            queue: VecDeque::new(),
            listeners: HashSet::new(),
            blocked: HashSet::new(),
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    /// Returns the key.
    pub fn key(&self) -> &ReplicantKey {
        &self.key
    }

    /// Returns the current value.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns the current revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns the compiled schema, if any.
    pub fn schema(&self) -> Option<&Arc<CompiledSchema>> {
        self.schema.as_ref()
    }

    /// Returns true if the value survives restarts.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Returns true once the initial value is in place.
    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    /// Returns the number of mutations waiting for the load to finish.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Marks the start of the initial load.
    pub fn begin_load(&mut self) {
        if self.state == LoadState::Uninitialized {
            self.state = LoadState::Loading;
        }
    }

    /// Installs the initial value and applies queued mutations in arrival order.
    ///
    /// The initial value does not count as a mutation; the revision stays 0.
    pub fn finish_load(&mut self, value: Option<Value>) -> Vec<MutationOutcome> {
        self.value = value;
        self.state = LoadState::Ready;

        let queued: Vec<QueuedMutation> = self.queue.drain(..).collect();
        if !queued.is_empty() {
            debug!(key = %self.key, count = queued.len(), "applying mutations queued during load");
        }
        queued.into_iter().map(|q| self.run(q)).collect()
    }

    /// Applies a mutation now, or queues it while loading.
    ///
    /// Returns `None` when the mutation was queued; its outcome is then
    /// returned by [`finish_load`](Replicant::finish_load).
    pub fn submit(&mut self, queued: QueuedMutation) -> Option<MutationOutcome> {
        if self.is_ready() {
            Some(self.run(queued))
        } else {
            self.queue.push_back(queued);
            None
        }
    }

    fn run(&mut self, queued: QueuedMutation) -> MutationOutcome {
        let result = match queued.origin {
            Some(origin) if self.blocked.contains(&origin) => Err(ServerError::ResyncRequired {
                revision: self.revision,
            }),
            _ => match queued.mutation {
                Mutation::Assign {
                    value,
                    expected_revision,
                } => self.assign(value, expected_revision),
                Mutation::Operations {
                    operations,
                    expected_revision,
                } => self.apply_operations(&operations, expected_revision),
            },
        };
        if let (Some(origin), Err(_)) = (queued.origin, &result) {
            self.block(origin);
        }
        MutationOutcome {
            origin: queued.origin,
            request_id: queued.request_id,
            result,
        }
    }

    /// Replaces the whole value.
    ///
    /// # Errors
    ///
    /// Returns an error if the Replicant is not ready, the revision does not
    /// match, or the value fails the schema.
    pub fn assign(
        &mut self,
        value: Option<Value>,
        expected_revision: Option<u64>,
    ) -> ServerResult<ChangeEvent> {
        self.check_revision(expected_revision)?;
        self.commit(value)
    }

    /// Applies operations to the current value.
    ///
    /// # Errors
    ///
    /// Returns an error if the Replicant is not ready, the revision does not
    /// match, the operations do not apply, or the result fails the schema.
    pub fn apply_operations(
        &mut self,
        operations: &[Operation],
        expected_revision: Option<u64>,
    ) -> ServerResult<ChangeEvent> {
        self.check_revision(expected_revision)?;
        let mut next = self.value.clone();
        apply_operations(&mut next, operations)?;
        self.commit(next)
    }

    /// Checks a value against the schema without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Validation`] if the value is not acceptable.
    pub fn validate(&self, value: Option<&Value>) -> ServerResult<()> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        match value {
            Some(value) => schema
                .validate(value)
                .map_err(|violations| ServerError::Validation { violations }),
            None => Err(ServerError::Validation {
                violations: vec![replicant_schema::Violation {
                    pointer: String::new(),
                    message: "value is undefined".into(),
                }],
            }),
        }
    }

    fn check_revision(&self, expected: Option<u64>) -> ServerResult<()> {
        if !self.is_ready() {
            return Err(ServerError::NotReady(self.key.clone()));
        }
        match expected {
            Some(expected) if expected != self.revision => Err(ServerError::StaleRevision {
                expected,
                actual: self.revision,
            }),
            _ => Ok(()),
        }
    }

    fn commit(&mut self, value: Option<Value>) -> ServerResult<ChangeEvent> {
        self.validate(value.as_ref())?;

        let operations = diff(self.value.as_ref(), value.as_ref());
        let old_value = std::mem::replace(&mut self.value, value);
        self.revision += 1;

        let event = ChangeEvent {
            key: self.key.clone(),
            value: self.value.clone(),
            old_value,
            revision: self.revision,
            operations,
        };
        for (_, observer) in &self.observers {
            observer(&event);
        }
        Ok(event)
    }

    /// Adds a listener and returns the state it should start from.
    ///
    /// Subscribing again also lifts a [`block`](Replicant::block).
    pub fn subscribe(&mut self, handle: ClientHandle) -> Snapshot {
        self.listeners.insert(handle);
        self.blocked.remove(&handle);
        self.snapshot()
    }

    /// Removes a listener. Returns true if it was subscribed.
    pub fn unsubscribe(&mut self, handle: ClientHandle) -> bool {
        self.blocked.remove(&handle);
        self.listeners.remove(&handle)
    }

    /// Rejects every further mutation from `handle` until it subscribes again.
    ///
    /// A client pipelines mutations on top of its own predictions, so anything
    /// it sent after a rejected mutation was computed from a value the server
    /// never had.
    pub fn block(&mut self, handle: ClientHandle) {
        if self.blocked.insert(handle) {
            debug!(key = %self.key, %handle, "connection must resync before mutating");
        }
    }

    /// Returns true if `handle` must resubscribe before its mutations apply.
    pub fn is_blocked(&self, handle: ClientHandle) -> bool {
        self.blocked.contains(&handle)
    }

    /// Returns true if `handle` is subscribed.
    pub fn is_subscribed(&self, handle: ClientHandle) -> bool {
        self.listeners.contains(&handle)
    }

    /// Returns the subscribed handles.
    pub fn listeners(&self) -> impl Iterator<Item = ClientHandle> + '_ {
        self.listeners.iter().copied()
    }

    /// Returns the number of subscribed handles.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Returns the current state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            key: self.key.clone(),
            value: self.value.clone(),
            revision: self.revision,
            schema: self.schema.as_ref().map(|s| s.document().clone()),
        }
    }

    /// Registers a server-side observer called for every accepted change.
    ///
    /// Observers run while the Replicant is locked by its owner and must not
    /// mutate it.
    pub fn on_change(&mut self, observer: ChangeObserver) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    /// Removes an observer. Returns true if it was registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }
}

impl fmt::Debug for Replicant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicant")
            .field("key", &self.key)
            .field("revision", &self.revision)
            .field("state", &self.state)
            .field("persistent", &self.persistent)
            .field("listeners", &self.listeners.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
