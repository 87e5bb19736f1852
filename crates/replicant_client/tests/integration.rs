//! Integration tests for Replicant clients against an in-process server.

use parking_lot::Mutex;
use proptest::prelude::*;
use replicant_client::{
    ChangeSource, ClientConfig, ClientError, ClientResult, ClientTransport, ProxyOptions, ProxyStatus,
    ReplicantClient, ReplicantProxy,
};
use replicant_protocol::{ClientMessage, ErrorKind, ReplicantKey, ServerMessage};
use replicant_schema::{BundleSchemaResolver, NoSchemas, SchemaResolver};
use replicant_server::{LocalBridge, LocalConnection, ServerConfig, ServerError};
use replicant_storage::InMemoryStore;
use serde_json::json;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

/// A transport that talks to a [`LocalBridge`].
struct BridgeTransport {
    bridge: Arc<LocalBridge>,
    connection: Mutex<Option<LocalConnection>>,
}

impl BridgeTransport {
    fn new(bridge: Arc<LocalBridge>) -> Self {
        let connection = bridge.connect();
        Self {
            bridge,
            connection: Mutex::new(Some(connection)),
        }
    }

    /// Drops the connection as if the network went away.
    fn drop_connection(&self) {
        self.connection.lock().take();
    }

    /// Takes every message waiting for this client.
    fn inbox(&self) -> Vec<ServerMessage> {
        self.connection
            .lock()
            .as_ref()
            .map(LocalConnection::drain)
            .unwrap_or_default()
    }
}

impl ClientTransport for BridgeTransport {
    fn send(&self, message: ClientMessage) -> ClientResult<()> {
        let connection = self.connection.lock();
        let Some(connection) = connection.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        match connection.send(message) {
            Ok(()) => Ok(()),
            Err(ServerError::Transport { reason, .. }) => Err(ClientError::transport_retryable(reason)),
            // Rejections come back through the inbox.
            Err(_) => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(LocalConnection::is_connected)
    }

    fn reconnect(&self) -> ClientResult<()> {
        *self.connection.lock() = Some(self.bridge.connect());
        Ok(())
    }

    fn close(&self) -> ClientResult<()> {
        self.drop_connection();
        Ok(())
    }
}

type Client = ReplicantClient<BridgeTransport>;
type Proxy = ReplicantProxy<BridgeTransport>;

fn start(schemas: Arc<dyn SchemaResolver>) -> Arc<LocalBridge> {
    Arc::new(LocalBridge::start(
        ServerConfig::default().with_default_persistent(false),
        Arc::new(InMemoryStore::new()),
        schemas,
    ))
}

fn client(bridge: &Arc<LocalBridge>) -> Client {
    ReplicantClient::new(BridgeTransport::new(Arc::clone(bridge)))
}

/// Delivers one round of waiting messages. Returns how many were delivered.
fn pump(client: &Client) -> usize {
    let messages = client.transport().inbox();
    let count = messages.len();
    for message in messages {
        client.handle_message(message);
    }
    count
}

/// Pumps every client until no messages are left in flight.
fn settle(clients: &[&Client]) {
    for _ in 0..100 {
        let delivered: usize = clients.iter().map(|c| pump(c)).sum();
        if delivered == 0 {
            return;
        }
    }
    panic!("messages still in flight after 100 rounds");
}

fn score_key() -> ReplicantKey {
    ReplicantKey::new("game", "score")
}

fn declare_score(client: &Client) -> Proxy {
    client
        .declare("game", "score", ProxyOptions::new().with_default(json!({"home": 0, "away": 0})))
        .unwrap()
}

#[test]
fn two_clients_converge() {
    let bridge = start(Arc::new(NoSchemas));
    let alice = client(&bridge);
    let bob = client(&bridge);
    let a = declare_score(&alice);
    let b = declare_score(&bob);
    settle(&[&alice, &bob]);

    assert!(a.is_ready());
    assert_eq!(b.value(), Some(json!({"home": 0, "away": 0})));

    a.update(|v| v["home"] = json!(1)).unwrap();
    settle(&[&alice, &bob]);
    assert_eq!(b.value(), Some(json!({"home": 1, "away": 0})));
    assert_eq!(b.revision(), 1);

    b.update(|v| v["away"] = json!(2)).unwrap();
    settle(&[&alice, &bob]);

    let server = bridge.replicator().read(&score_key()).unwrap();
    assert_eq!(server.value, Some(json!({"home": 1, "away": 2})));
    assert_eq!(a.value(), server.value);
    assert_eq!(b.value(), server.value);
    assert_eq!(a.revision(), 2);
    assert_eq!(a.pending_stats().matched, 1);
}

#[test]
fn conflicting_writes_resolve_to_server_order() {
    let bridge = start(Arc::new(NoSchemas));
    let alice = client(&bridge);
    let bob = client(&bridge);
    let a = declare_score(&alice);
    let b = declare_score(&bob);
    settle(&[&alice, &bob]);

    // Both write against revision 0; Alice reaches the server first.
    a.set(json!({"home": 1, "away": 0})).unwrap();
    b.set(json!({"home": 0, "away": 1})).unwrap();
    assert_eq!(b.value(), Some(json!({"home": 0, "away": 1})));

    settle(&[&alice, &bob]);

    assert_eq!(a.value(), Some(json!({"home": 1, "away": 0})));
    assert_eq!(b.value(), a.value());
    assert_eq!(b.revision(), 1);
    assert_eq!(b.status(), ProxyStatus::Ready);
    assert_eq!(b.pending_count(), 0);
    assert!(matches!(
        b.last_error(),
        None | Some(ClientError::Rejected { kind: ErrorKind::StaleRevision, .. })
    ));
}

#[test]
fn burst_from_one_client_is_accepted_in_order() {
    let bridge = start(Arc::new(NoSchemas));
    let alice = client(&bridge);
    let bob = client(&bridge);
    let a = declare_score(&alice);
    let b = declare_score(&bob);
    settle(&[&alice, &bob]);

    for i in 1..=5 {
        a.update(move |v| v["home"] = json!(i)).unwrap();
    }
    assert_eq!(a.pending_count(), 5);
    settle(&[&alice, &bob]);

    assert_eq!(a.pending_count(), 0);
    assert_eq!(a.revision(), 5);
    assert_eq!(b.value(), Some(json!({"home": 5, "away": 0})));
    assert_eq!(a.pending_stats().matched, 5);
}

#[test]
fn server_side_assign_reaches_clients() {
    let bridge = start(Arc::new(NoSchemas));
    let alice = client(&bridge);
    let a = declare_score(&alice);
    settle(&[&alice]);

    let sources = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sources);
    a.on_change(move |change| sink.lock().push(change.source));

    bridge
        .replicator()
        .assign(&score_key(), Some(json!({"home": 9, "away": 9})))
        .unwrap();
    settle(&[&alice]);

    assert_eq!(a.value(), Some(json!({"home": 9, "away": 9})));
    assert_eq!(sources.lock().as_slice(), &[ChangeSource::Remote]);
}

#[test]
fn duplicate_delivery_is_idempotent() {
    let bridge = start(Arc::new(NoSchemas));
    let alice = client(&bridge);
    let bob = client(&bridge);
    let a = declare_score(&alice);
    let b = declare_score(&bob);
    settle(&[&alice, &bob]);

    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    b.on_change(move |_| *counter.lock() += 1);

    a.update(|v| v["home"] = json!(3)).unwrap();
    a.update(|v| v["away"] = json!(4)).unwrap();
    settle(&[&alice]);

    let messages = bob.transport().inbox();
    assert_eq!(messages.len(), 2);
    for message in messages.iter().chain(messages.iter()) {
        bob.handle_message(message.clone());
    }

    assert_eq!(b.value(), Some(json!({"home": 3, "away": 4})));
    assert_eq!(b.revision(), 2);
    assert_eq!(*calls.lock(), 2);
}

#[test]
fn server_rejection_rolls_back() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("game").join("schemas")).unwrap();
    fs::write(
        dir.path().join("game").join("schemas").join("score.json"),
        r#"{"type": "integer", "minimum": 0, "default": 0}"#,
    )
    .unwrap();
    let bridge = start(Arc::new(BundleSchemaResolver::new(dir.path())));

    let trusting = ReplicantClient::with_config(
        BridgeTransport::new(Arc::clone(&bridge)),
        ClientConfig::new().with_local_validation(false),
    );
    let careful = client(&bridge);
    let t = trusting.declare("game", "score", ProxyOptions::new()).unwrap();
    let c = careful.declare("game", "score", ProxyOptions::new()).unwrap();
    settle(&[&trusting, &careful]);
    assert_eq!(t.value(), Some(json!(0)));
    assert!(c.schema().is_some());

    // Caught locally, never sent.
    assert!(matches!(c.set(json!(-1)), Err(ClientError::Validation(_))));

    // Sent, rejected by the server, rolled back.
    t.set(json!(-1)).unwrap();
    assert_eq!(t.value(), Some(json!(-1)));
    settle(&[&trusting, &careful]);

    assert_eq!(t.value(), Some(json!(0)));
    assert!(matches!(
        t.last_error(),
        Some(ClientError::Rejected { kind: ErrorKind::Validation, .. })
    ));
    assert_eq!(c.revision(), 0);
    assert_eq!(bridge.replicator().read(&score_key()).unwrap().revision, 0);

    // The rejection resynced the proxy; it can write again.
    assert!(t.is_ready());
    t.set(json!(4)).unwrap();
    settle(&[&trusting, &careful]);
    assert_eq!(c.value(), Some(json!(4)));
    assert_eq!(bridge.replicator().read(&score_key()).unwrap().revision, 1);
}

#[test]
fn pipelined_burst_from_a_stale_client_keeps_the_other_write() {
    let bridge = start(Arc::new(NoSchemas));
    let alice = client(&bridge);
    let bob = client(&bridge);
    let a = declare_score(&alice);
    let b = declare_score(&bob);
    settle(&[&alice, &bob]);

    b.set(json!({"home": 0, "away": 9})).unwrap();
    settle(&[&bob]);
    assert_eq!(bridge.replicator().read(&score_key()).unwrap().revision, 1);

    // Alice has not heard about revision 1 yet.
    assert_eq!(a.revision(), 0);
    a.set(json!({"home": 1, "away": 0})).unwrap();
    a.update(|v| v["home"] = json!(2)).unwrap();
    assert_eq!(a.pending_count(), 2);
    settle(&[&alice, &bob]);

    let server = bridge.replicator().read(&score_key()).unwrap();
    assert_eq!(server.value, Some(json!({"home": 0, "away": 9})));
    assert_eq!(server.revision, 1);
    assert_eq!(a.value(), server.value);
    assert_eq!(b.value(), server.value);
    assert_eq!(a.status(), ProxyStatus::Ready);
    assert_eq!(a.pending_count(), 0);
    assert_eq!(a.pending_stats().rejected, 2);

    // Once resynced, Alice's edits apply on top of Bob's.
    a.update(|v| v["home"] = json!(2)).unwrap();
    settle(&[&alice, &bob]);
    assert_eq!(b.value(), Some(json!({"home": 2, "away": 9})));
    assert_eq!(bridge.replicator().read(&score_key()).unwrap().revision, 2);
}

#[test]
fn reconnect_resyncs_and_replays_deferred() {
    let bridge = start(Arc::new(NoSchemas));
    let alice = client(&bridge);
    let bob = client(&bridge);
    let a = declare_score(&alice);
    let b = declare_score(&bob);
    settle(&[&alice, &bob]);

    bob.transport().drop_connection();
    bob.handle_disconnect();
    assert_eq!(b.status(), ProxyStatus::Stale);

    a.update(|v| v["home"] = json!(5)).unwrap();
    b.update(|v| v["away"] = json!(7)).unwrap();
    assert_eq!(b.deferred_count(), 1);
    assert_eq!(b.value(), Some(json!({"home": 0, "away": 0})));
    settle(&[&alice, &bob]);

    bob.reconnect_with_retry().unwrap();
    settle(&[&alice, &bob]);

    let expected = Some(json!({"home": 5, "away": 7}));
    assert_eq!(b.value(), expected);
    assert_eq!(a.value(), expected);
    assert_eq!(a.revision(), 2);
    assert_eq!(b.revision(), 2);
    assert_eq!(bridge.replicator().subscriber_count(&score_key()), 2);
}

#[test]
fn release_stops_updates() {
    let bridge = start(Arc::new(NoSchemas));
    let alice = client(&bridge);
    let bob = client(&bridge);
    let a = declare_score(&alice);
    let b = declare_score(&bob);
    settle(&[&alice, &bob]);

    b.release().unwrap();
    assert_eq!(bridge.replicator().subscriber_count(&score_key()), 1);

    a.set(json!({"home": 2, "away": 2})).unwrap();
    settle(&[&alice, &bob]);
    assert_eq!(b.value(), Some(json!({"home": 0, "away": 0})));
}

#[derive(Debug, Clone)]
enum Step {
    Set(usize, i64),
    Bump(usize),
    Pump(usize),
    Reconnect(usize),
    ServerSet(i64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..3usize, -50i64..50).prop_map(|(c, v)| Step::Set(c, v)),
        4 => (0..3usize).prop_map(Step::Bump),
        4 => (0..3usize).prop_map(Step::Pump),
        1 => (0..3usize).prop_map(Step::Reconnect),
        1 => (-50i64..50).prop_map(Step::ServerSet),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn clients_converge_on_server_value(steps in prop::collection::vec(step(), 1..40)) {
        let bridge = start(Arc::new(NoSchemas));
        let clients: Vec<Client> = (0..3).map(|_| client(&bridge)).collect();
        let proxies: Vec<Proxy> = clients
            .iter()
            .map(|c| c.declare("game", "counter", ProxyOptions::new().with_default(json!({"n": 0}))).unwrap())
            .collect();
        let key = ReplicantKey::new("game", "counter");

        for step in steps {
            match step {
                Step::Set(i, n) => proxies[i].set(json!({"n": n})).unwrap(),
                Step::Bump(i) => match proxies[i].update(|v| {
                    let n = v["n"].as_i64().unwrap_or(0);
                    v["n"] = json!(n + 1);
                }) {
                    Ok(()) | Err(ClientError::Undefined) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                },
                Step::Pump(i) => {
                    pump(&clients[i]);
                }
                Step::Reconnect(i) => {
                    clients[i].transport().drop_connection();
                    clients[i].handle_disconnect();
                    clients[i].reconnect().unwrap();
                }
                Step::ServerSet(n) => {
                    bridge.replicator().assign(&key, Some(json!({"n": n}))).unwrap();
                }
            }
        }

        let refs: Vec<&Client> = clients.iter().collect();
        settle(&refs);

        let server = bridge.replicator().read(&key).unwrap();
        for proxy in &proxies {
            prop_assert_eq!(proxy.status(), ProxyStatus::Ready);
            prop_assert_eq!(proxy.pending_count(), 0);
            prop_assert_eq!(proxy.deferred_count(), 0);
            prop_assert_eq!(proxy.revision(), server.revision);
            prop_assert_eq!(proxy.value(), server.value.clone());
        }
    }
}
