//! The Server Replicator: registry and message dispatch.

use crate::bridge::Outbound;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handle::ClientHandle;
use crate::replicant::{
    ChangeEvent, ChangeObserver, Mutation, MutationOutcome, ObserverId, QueuedMutation, Replicant,
    Snapshot,
};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use replicant_protocol::{ClientMessage, Operation, ReplicantKey, ServerMessage};
use replicant_schema::{CompiledSchema, SchemaError, SchemaResolver};
use replicant_storage::{validate_key, Persister, PersisterConfig, PersisterStats, ReplicantStore};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options for declaring a Replicant.
#[derive(Debug, Clone, Default)]
pub struct DeclareOptions {
    /// Value used when nothing is persisted and the schema has no default.
    pub default_value: Option<Value>,
    /// Schema file, resolved by the replicator's [`SchemaResolver`].
    pub schema_path: Option<String>,
    /// Inline schema document. Takes precedence over `schema_path`.
    pub schema: Option<Value>,
    /// Whether the value survives restarts; the server default applies when `None`.
    pub persistent: Option<bool>,
}

impl DeclareOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default value.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Sets the schema file.
    pub fn with_schema_path(mut self, path: impl Into<String>) -> Self {
        self.schema_path = Some(path.into());
        self
    }

    /// Sets an inline schema document.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets persistence.
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = Some(persistent);
        self
    }
}

struct EntityCell {
    replicant: Mutex<Replicant>,
    ready: Condvar,
}

impl EntityCell {
    fn new(replicant: Replicant) -> Self {
        Self {
            replicant: Mutex::new(replicant),
            ready: Condvar::new(),
        }
    }

    /// Locks the Replicant once its initial load has finished.
    fn lock_ready(&self) -> MutexGuard<'_, Replicant> {
        let mut guard = self.replicant.lock();
        while !guard.is_ready() {
            self.ready.wait(&mut guard);
        }
        guard
    }
}

/// The authoritative registry of Replicants.
///
/// At most one [`Replicant`] exists per key. It is created by the first
/// declare, loaded from the store (or seeded from its default) and kept until
/// explicitly unregistered.
///
/// # Locking
///
/// Each Replicant has its own lock; all mutation, subscription and broadcast
/// for one Replicant happen under it. The subscription index is only ever
/// locked after (never before) a Replicant lock.
pub struct Replicator {
    config: ServerConfig,
    store: Arc<dyn ReplicantStore>,
    persister: Persister,
    schemas: Arc<dyn SchemaResolver>,
    outbound: Arc<dyn Outbound>,
    entities: RwLock<HashMap<ReplicantKey, Arc<EntityCell>>>,
    subscriptions: RwLock<HashMap<ClientHandle, HashSet<ReplicantKey>>>,
}

impl Replicator {
    /// Creates a replicator.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ReplicantStore>,
        schemas: Arc<dyn SchemaResolver>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        let persister = Persister::new(
            Arc::clone(&store),
            PersisterConfig::new(config.persist_debounce),
        );
        Self {
            config,
            store,
            persister,
            schemas,
            outbound,
            entities: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Declares a Replicant, creating and loading it if needed.
    ///
    /// Repeated declares return the existing Replicant's current state; their
    /// options are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not usable as a storage key, if the
    /// schema cannot be resolved or compiled, if both the schema and `options`
    /// supply a default, or if the explicit default fails the schema.
    pub fn declare(&self, key: &ReplicantKey, options: DeclareOptions) -> ServerResult<Snapshot> {
        let cell = self.ensure(key, options)?;
        let snapshot = cell.lock_ready().snapshot();
        Ok(snapshot)
    }

    /// Replaces a Replicant's value without a revision check.
    ///
    /// The change is persisted and broadcast like a client assignment.
    ///
    /// # Errors
    ///
    /// Returns an error if the Replicant is unknown or the value fails its schema.
    pub fn assign(&self, key: &ReplicantKey, value: Option<Value>) -> ServerResult<ChangeEvent> {
        self.mutate_now(
            key,
            Mutation::Assign {
                value,
                expected_revision: None,
            },
        )
    }

    /// Applies operations to a Replicant's value.
    ///
    /// # Errors
    ///
    /// Returns an error if the Replicant is unknown, the revision does not
    /// match, the operations do not apply, or the result fails the schema.
    pub fn apply_operations(
        &self,
        key: &ReplicantKey,
        operations: Vec<Operation>,
        expected_revision: Option<u64>,
    ) -> ServerResult<ChangeEvent> {
        self.check_operation_count(&operations)?;
        self.mutate_now(
            key,
            Mutation::Operations {
                operations,
                expected_revision,
            },
        )
    }

    /// Returns a Replicant's current state.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownReplicant`] if it has not been declared.
    pub fn read(&self, key: &ReplicantKey) -> ServerResult<Snapshot> {
        Ok(self.cell(key)?.lock_ready().snapshot())
    }

    /// Registers a server-side observer of a Replicant's changes.
    ///
    /// The observer runs while the Replicant is locked and must not call
    /// back into the replicator for the same Replicant.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownReplicant`] if it has not been declared.
    pub fn on_change(
        &self,
        key: &ReplicantKey,
        observer: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> ServerResult<ObserverId> {
        let observer: ChangeObserver = Arc::new(observer);
        Ok(self.cell(key)?.replicant.lock().on_change(observer))
    }

    /// Removes an observer. Returns true if it was registered.
    pub fn remove_observer(&self, key: &ReplicantKey, id: ObserverId) -> bool {
        self.cell(key)
            .map(|cell| {
                let mut replicant = cell.replicant.lock();
                replicant.remove_observer(id)
            })
            .unwrap_or(false)
    }

    /// Dispatches one message from a connection.
    ///
    /// Replies (snapshots, read results, errors) go to `handle` only; accepted
    /// changes are broadcast to every subscriber.
    ///
    /// # Errors
    ///
    /// Returns the rejection that was also sent to `handle` as an `error`
    /// message.
    pub fn handle_client_message(&self, handle: ClientHandle, message: ClientMessage) -> ServerResult<()> {
        let key = message.key();
        let request_id = message.request_id();

        let result = match message {
            ClientMessage::Declare {
                default_value,
                schema_path,
                persistent,
                ..
            } => {
                let options = DeclareOptions {
                    default_value,
                    schema_path,
                    schema: None,
                    persistent,
                };
                self.subscribe(handle, &key, options)
            }
            ClientMessage::Assign { value, revision, .. } => self.mutate_from(
                handle,
                &key,
                request_id,
                Mutation::Assign {
                    value,
                    expected_revision: Some(revision),
                },
            ),
            ClientMessage::Operations {
                operations,
                expected_revision,
                ..
            } => self.mutate_from(
                handle,
                &key,
                request_id,
                Mutation::Operations {
                    operations,
                    expected_revision: Some(expected_revision),
                },
            ),
            ClientMessage::Read { .. } => self.read(&key).and_then(|snapshot| {
                self.deliver(
                    handle,
                    ServerMessage::Value {
                        namespace: key.namespace.clone(),
                        name: key.name.clone(),
                        value: snapshot.value,
                        revision: snapshot.revision,
                    },
                )
            }),
            ClientMessage::Unsubscribe { .. } => {
                self.unsubscribe(handle, &key);
                Ok(())
            }
        };

        if let Err(e) = &result {
            self.reject(handle, Some(&key), request_id, e);
        }
        result
    }

    /// Decodes and dispatches a JSON text message from a connection.
    ///
    /// # Errors
    ///
    /// Undecodable input is answered and returned as
    /// [`ServerError::InvalidRequest`]; otherwise as
    /// [`handle_client_message`](Replicator::handle_client_message).
    pub fn handle_text(&self, handle: ClientHandle, text: &str) -> ServerResult<()> {
        match ClientMessage::decode(text) {
            Ok(message) => self.handle_client_message(handle, message),
            Err(e) => {
                debug!(%handle, error = %e, "undecodable client message");
                let error = ServerError::InvalidRequest(e.to_string());
                self.reject(handle, None, None, &error);
                Err(error)
            }
        }
    }

    /// Unsubscribes a connection from every Replicant.
    ///
    /// Replicants themselves are kept.
    pub fn handle_disconnect(&self, handle: ClientHandle) {
        let keys = self.subscriptions.write().remove(&handle).unwrap_or_default();
        for key in &keys {
            if let Ok(cell) = self.cell(key) {
                cell.replicant.lock().unsubscribe(handle);
            }
        }
        debug!(%handle, released = keys.len(), "client disconnected");
    }

    /// Removes a Replicant from the registry.
    ///
    /// Subscribers stop receiving changes; its persisted record is kept.
    /// Returns true if it existed.
    pub fn unregister(&self, key: &ReplicantKey) -> bool {
        let Some(cell) = self.entities.write().remove(key) else {
            return false;
        };
        let replicant = cell.replicant.lock();
        let mut subscriptions = self.subscriptions.write();
        for handle in replicant.listeners() {
            if let Some(keys) = subscriptions.get_mut(&handle) {
                keys.remove(key);
            }
        }
        info!(%key, "unregistered replicant");
        true
    }

    /// Removes every Replicant in a namespace. Returns how many were removed.
    pub fn unregister_namespace(&self, namespace: &str) -> usize {
        let keys: Vec<ReplicantKey> = self
            .entities
            .read()
            .keys()
            .filter(|key| key.namespace == namespace)
            .cloned()
            .collect();
        keys.iter().filter(|key| self.unregister(key)).count()
    }

    /// Writes every pending persistence request now.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence worker has stopped.
    pub fn flush(&self) -> ServerResult<()> {
        self.persister.flush()?;
        Ok(())
    }

    /// Returns the number of registered Replicants.
    pub fn replicant_count(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns the registered keys, sorted.
    pub fn keys(&self) -> Vec<ReplicantKey> {
        let mut keys: Vec<ReplicantKey> = self.entities.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the number of connections subscribed to a Replicant.
    pub fn subscriber_count(&self, key: &ReplicantKey) -> usize {
        self.cell(key)
            .map(|cell| {
                let replicant = cell.replicant.lock();
                replicant.listener_count()
            })
            .unwrap_or(0)
    }

    /// Returns the persister's activity counters.
    pub fn persister_stats(&self) -> &PersisterStats {
        self.persister.stats()
    }

    fn cell(&self, key: &ReplicantKey) -> ServerResult<Arc<EntityCell>> {
        self.entities
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ServerError::UnknownReplicant(key.clone()))
    }

    fn check_operation_count(&self, operations: &[Operation]) -> ServerResult<()> {
        let max = self.config.max_operations_per_message;
        if operations.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many operations: {} > {max}",
                operations.len()
            )));
        }
        Ok(())
    }

    /// Looks up or creates and loads the Replicant for `key`.
    fn ensure(&self, key: &ReplicantKey, options: DeclareOptions) -> ServerResult<Arc<EntityCell>> {
        if let Ok(cell) = self.cell(key) {
            return Ok(cell);
        }
        validate_key(&key.namespace, &key.name)
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;

        let schema = self.compile_schema(key, &options)?;
        let default = seed_default(schema.as_deref(), options.default_value)?;
        let persistent = options.persistent.unwrap_or(self.config.default_persistent);

        let cell = {
            let mut entities = self.entities.write();
            if let Some(existing) = entities.get(key) {
                return Ok(Arc::clone(existing));
            }
            let mut replicant = Replicant::new(key.clone(), schema.clone(), persistent);
            replicant.begin_load();
            let cell = Arc::new(EntityCell::new(replicant));
            entities.insert(key.clone(), Arc::clone(&cell));
            cell
        };

        // Loaded without holding any lock; mutations arriving meanwhile queue.
        let initial = if persistent {
            self.load_persisted(key, schema.as_deref()).or(default)
        } else {
            default
        };

        let mut disconnected = Vec::new();
        {
            let mut replicant = cell.replicant.lock();
            let outcomes = replicant.finish_load(initial);
            cell.ready.notify_all();
            for outcome in outcomes {
                let (origin, request_id) = (outcome.origin, outcome.request_id);
                if let Err(e) = self.settle(&replicant, outcome, &mut disconnected) {
                    if let Some(origin) = origin {
                        self.reject(origin, Some(key), request_id, &e);
                    }
                }
            }
            info!(
                %key,
                persistent,
                schema = replicant.schema().is_some(),
                revision = replicant.revision(),
                "declared replicant"
            );
        }
        self.drop_connections(disconnected);

        Ok(cell)
    }

    fn compile_schema(
        &self,
        key: &ReplicantKey,
        options: &DeclareOptions,
    ) -> ServerResult<Option<Arc<CompiledSchema>>> {
        let compiled = match &options.schema {
            Some(document) => Some(CompiledSchema::compile(document)?),
            None => self
                .schemas
                .load(&key.namespace, &key.name, options.schema_path.as_deref())?,
        };
        Ok(compiled.map(Arc::new))
    }

    fn load_persisted(&self, key: &ReplicantKey, schema: Option<&CompiledSchema>) -> Option<Value> {
        let value = match self.store.load(&key.namespace, &key.name) {
            Ok(value) => value?,
            Err(e) => {
                warn!(%key, error = %e, "failed to load persisted value, using default");
                return None;
            }
        };

        if let Some(schema) = schema {
            if let Err(violations) = schema.validate(&value) {
                warn!(
                    %key,
                    violations = violations.len(),
                    "persisted value fails schema, using default"
                );
                return None;
            }
        }
        Some(value)
    }

    fn subscribe(&self, handle: ClientHandle, key: &ReplicantKey, options: DeclareOptions) -> ServerResult<()> {
        let cell = self.ensure(key, options)?;
        let mut replicant = cell.lock_ready();
        let snapshot = replicant.subscribe(handle);
        self.subscriptions
            .write()
            .entry(handle)
            .or_default()
            .insert(key.clone());

        // Sent under the lock so no change can overtake the snapshot.
        let delivered = self.deliver(
            handle,
            ServerMessage::Declared {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                value: snapshot.value,
                revision: snapshot.revision,
                schema: snapshot.schema,
            },
        );
        drop(replicant);

        if delivered.is_err() {
            self.handle_disconnect(handle);
        }
        delivered
    }

    fn unsubscribe(&self, handle: ClientHandle, key: &ReplicantKey) {
        if let Ok(cell) = self.cell(key) {
            cell.replicant.lock().unsubscribe(handle);
        }
        if let Some(keys) = self.subscriptions.write().get_mut(&handle) {
            keys.remove(key);
        }
    }

    fn mutate_now(&self, key: &ReplicantKey, mutation: Mutation) -> ServerResult<ChangeEvent> {
        let cell = self.cell(key)?;
        let mut disconnected = Vec::new();
        let result = {
            let mut replicant = cell.lock_ready();
            let outcome = replicant.submit(QueuedMutation {
                mutation,
                origin: None,
                request_id: None,
            });
            match outcome {
                Some(outcome) => self.settle(&replicant, outcome, &mut disconnected),
                None => Err(ServerError::NotReady(key.clone())),
            }
        };
        self.drop_connections(disconnected);
        result
    }

    fn mutate_from(
        &self,
        handle: ClientHandle,
        key: &ReplicantKey,
        request_id: Option<u64>,
        mutation: Mutation,
    ) -> ServerResult<()> {
        let cell = self.cell(key)?;
        let mut disconnected = Vec::new();
        let result = {
            let mut replicant = cell.replicant.lock();
            if let Mutation::Operations { operations, .. } = &mutation {
                if let Err(e) = self.check_operation_count(operations) {
                    replicant.block(handle);
                    return Err(e);
                }
            }
            let outcome = replicant.submit(QueuedMutation {
                mutation,
                origin: Some(handle),
                request_id,
            });
            match outcome {
                Some(outcome) => self.settle(&replicant, outcome, &mut disconnected).map(|_| ()),
                None => {
                    debug!(%key, %handle, "replicant loading, mutation queued");
                    Ok(())
                }
            }
        };
        self.drop_connections(disconnected);
        result
    }

    /// Persists and broadcasts an accepted change, or reports a rejection.
    ///
    /// Must be called with the Replicant locked. Rejections are returned, not
    /// sent; the caller decides who hears about them.
    fn settle(
        &self,
        replicant: &Replicant,
        outcome: MutationOutcome,
        disconnected: &mut Vec<ClientHandle>,
    ) -> ServerResult<ChangeEvent> {
        let MutationOutcome {
            origin,
            request_id,
            result,
        } = outcome;

        let event = match result {
            Ok(event) => event,
            Err(e) => {
                debug!(key = %replicant.key(), error = %e, "mutation rejected");
                return Err(e);
            }
        };

        if replicant.is_persistent() {
            match &event.value {
                Some(value) => self
                    .persister
                    .schedule(&event.key.namespace, &event.key.name, value.clone()),
                None => self
                    .persister
                    .schedule_remove(&event.key.namespace, &event.key.name),
            }
        }

        let mut recipients: Vec<ClientHandle> = replicant.listeners().collect();
        if let Some(origin) = origin {
            if !replicant.is_subscribed(origin) {
                recipients.push(origin);
            }
        }

        for handle in recipients {
            let message = ServerMessage::Change {
                namespace: event.key.namespace.clone(),
                name: event.key.name.clone(),
                value: event.value.clone(),
                revision: event.revision,
                operations: event.operations.clone(),
                request_id: if Some(handle) == origin { request_id } else { None },
            };
            if self.outbound.send(handle, message).is_err() {
                disconnected.push(handle);
            }
        }

        Ok(event)
    }

    fn deliver(&self, handle: ClientHandle, message: ServerMessage) -> ServerResult<()> {
        self.outbound.send(handle, message).map_err(|e| {
            warn!(%handle, error = %e, "failed to deliver message");
            e
        })
    }

    fn reject(&self, handle: ClientHandle, key: Option<&ReplicantKey>, request_id: Option<u64>, error: &ServerError) {
        let revision = match error {
            ServerError::StaleRevision { actual, .. } => Some(*actual),
            ServerError::ResyncRequired { revision } => Some(*revision),
            _ => None,
        };
        if error.is_server_error() {
            warn!(%handle, error = %error, "request failed");
        }
        let message = ServerMessage::Error {
            namespace: key.map(|k| k.namespace.clone()),
            name: key.map(|k| k.name.clone()),
            request_id,
            kind: error.error_kind(),
            reason: error.to_string(),
            revision,
        };
        // A failed error reply needs no further handling; the transport is gone.
        let _ = self.outbound.send(handle, message);
    }

    fn drop_connections(&self, handles: Vec<ClientHandle>) {
        for handle in handles {
            warn!(%handle, "delivery failed, dropping subscriber");
            self.handle_disconnect(handle);
        }
    }
}

fn seed_default(schema: Option<&CompiledSchema>, explicit: Option<Value>) -> ServerResult<Option<Value>> {
    let Some(schema) = schema else {
        return Ok(explicit);
    };

    if schema.has_explicit_default() && explicit.is_some() {
        return Err(SchemaError::ConflictingDefault.into());
    }
    match explicit {
        Some(value) => {
            schema
                .validate(&value)
                .map_err(|violations| ServerError::Validation { violations })?;
            Ok(Some(value))
        }
        None => {
            let derived = schema.default_value();
            if let Some(Err(violations)) = derived.as_ref().map(|value| schema.validate(value)) {
                warn!(
                    violations = violations.len(),
                    "schema default fails its own schema, starting undefined"
                );
                return Ok(None);
            }
            Ok(derived)
        }
    }
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("config", &self.config)
            .field("replicants", &self.replicant_count())
            .finish_non_exhaustive()
    }
}
