//! Subscription Registry
//!
//! Maps each watched username to one upstream session and the set of
//! connections watching it.
//!
//! ## Session lifecycle
//!
//! ```text
//! first watch ──► Pending ──connect ok──► Active ──last unwatch──► disconnected
//!                    │            │
//!                    │            └──no watchers left──► disconnected
//!                    └──connect failed──► removed, every watcher notified
//! ```
//!
//! A `Pending` entry is reserved before the connect call suspends, so a second
//! watcher arriving mid-connect joins it instead of opening another upstream
//! connection. A pending entry outlives its last watcher until the connect
//! resolves; a watcher arriving in between joins it. Each entry carries a
//! generation number; a connect that finishes after its entry was removed by
//! shutdown closes its own handle.

mod error;
mod router;
mod username;

pub use error::{RegistryError, RegistryResult};
pub use username::Username;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;

use crate::upstream::{EventSender, UpstreamConnector, UpstreamSession};
use crate::websocket::{ConnectionHub, ConnectionId, ServerMessage, StatusPayload};
use router::EventRouter;

/// Result of a successful watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Joined a session that already existed (active or still connecting)
    Joined(Username),
    /// Opened a new upstream session
    Connected(Username),
}

enum SessionState {
    Pending,
    Active(Box<dyn UpstreamSession>),
}

struct Entry {
    generation: u64,
    state: SessionState,
    subscribers: HashSet<ConnectionId>,
    router: AbortHandle,
}

impl Entry {
    /// Stop routing and close the upstream connection, if one is open
    fn close(self) {
        self.router.abort();
        if let SessionState::Active(session) = self.state {
            session.disconnect();
        }
    }
}

type Entries = Arc<Mutex<HashMap<Username, Entry>>>;

/// Shared registry internals, cloned into router and connect tasks
#[derive(Clone)]
pub(crate) struct RegistryRef {
    entries: Entries,
    hub: Arc<ConnectionHub>,
}

impl RegistryRef {
    /// Send `message` to every current subscriber of `username`
    ///
    /// Runs under the registry lock, so an unwatch either completes before the
    /// delivery starts or waits until it ends.
    pub(crate) async fn deliver(
        &self,
        username: &Username,
        generation: u64,
        message: ServerMessage,
    ) -> usize {
        let entries = self.entries.lock().await;
        let Some(entry) = entries
            .get(username)
            .filter(|entry| entry.generation == generation)
        else {
            return 0;
        };

        let mut sent = 0;
        for id in &entry.subscribers {
            if self.hub.send_to(id, message.clone()).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Promote a pending entry to active
    async fn activate(
        &self,
        username: &Username,
        generation: u64,
        session: Box<dyn UpstreamSession>,
    ) -> RegistryResult<WatchOutcome> {
        let mut entries = self.entries.lock().await;
        let unwatched = entries
            .get(username)
            .filter(|entry| entry.generation == generation)
            .map(|entry| entry.subscribers.is_empty());

        if unwatched == Some(false) {
            if let Some(entry) = entries.get_mut(username) {
                entry.state = SessionState::Active(session);
                tracing::info!(
                    username = %username,
                    subscribers = entry.subscribers.len(),
                    "Upstream session active"
                );
                return Ok(WatchOutcome::Connected(username.clone()));
            }
        } else if let Some(entry) = unwatched.and_then(|_| entries.remove(username)) {
            entry.close();
        }

        session.disconnect();
        tracing::info!(username = %username, "Closed upstream session nobody is watching");
        Err(RegistryError::Abandoned(username.to_string()))
    }

    /// Drop a pending entry whose connect failed and notify everyone who
    /// joined it, except `requester` who gets the error returned instead
    async fn fail_pending(
        &self,
        username: &Username,
        generation: u64,
        reason: &str,
        requester: &str,
    ) {
        let mut entries = self.entries.lock().await;
        if !matches!(entries.get(username), Some(entry) if entry.generation == generation) {
            return;
        }
        let Some(entry) = entries.remove(username) else {
            return;
        };

        let status: ServerMessage = StatusPayload::failed("failed to connect").err(reason).into();
        for id in entry.subscribers.iter().filter(|id| id.as_str() != requester) {
            let _ = self.hub.send_to(id, status.clone()).await;
        }
        entry.close();
    }
}

/// Process-wide map of username → upstream session and watchers
pub struct SubscriptionRegistry {
    shared: RegistryRef,
    connector: Arc<dyn UpstreamConnector>,
    next_generation: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(connector: Arc<dyn UpstreamConnector>, hub: Arc<ConnectionHub>) -> Self {
        Self {
            shared: RegistryRef {
                entries: Arc::new(Mutex::new(HashMap::new())),
                hub,
            },
            connector,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Subscribe a connection to a username
    ///
    /// Joins the existing session if there is one. Otherwise reserves a
    /// placeholder and opens the upstream connection; the connect runs in its
    /// own task so the placeholder is always resolved even if the caller is
    /// dropped.
    pub async fn watch(
        &self,
        connection_id: &str,
        raw_username: &str,
    ) -> RegistryResult<WatchOutcome> {
        let username = Username::parse(raw_username)?;

        let (generation, events) = {
            let mut entries = self.shared.entries.lock().await;
            if let Some(entry) = entries.get_mut(&username) {
                entry.subscribers.insert(connection_id.to_string());
                tracing::debug!(
                    connection_id = %connection_id,
                    username = %username,
                    subscribers = entry.subscribers.len(),
                    "Joined existing session"
                );
                return Ok(WatchOutcome::Joined(username));
            }

            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let router = EventRouter::new(username.clone(), generation, self.shared.clone());
            let handle = tokio::spawn(router.run(events_rx));

            entries.insert(
                username.clone(),
                Entry {
                    generation,
                    state: SessionState::Pending,
                    subscribers: HashSet::from([connection_id.to_string()]),
                    router: handle.abort_handle(),
                },
            );
            (generation, events_tx)
        };

        tracing::info!(
            connection_id = %connection_id,
            username = %username,
            "Opening upstream session"
        );

        let task = tokio::spawn(connect_session(
            self.shared.clone(),
            Arc::clone(&self.connector),
            username.clone(),
            generation,
            events,
            connection_id.to_string(),
        ));

        match task.await {
            Ok(result) => result,
            Err(e) => {
                let reason = format!("connect task failed: {}", e);
                self.shared
                    .fail_pending(&username, generation, &reason, connection_id)
                    .await;
                Err(RegistryError::ConnectFailure {
                    username: username.to_string(),
                    reason,
                })
            }
        }
    }

    /// Remove a connection from every username it watches
    ///
    /// Active sessions left without watchers are closed. A pending session
    /// left without watchers stays reserved until its connect resolves, then
    /// closes itself unless someone joined meanwhile. Returns the usernames
    /// whose sessions were closed.
    pub async fn unwatch(&self, connection_id: &str) -> Vec<Username> {
        let mut entries = self.shared.entries.lock().await;

        let emptied: Vec<Username> = entries
            .iter_mut()
            .filter_map(|(username, entry)| {
                let left = entry.subscribers.remove(connection_id) && entry.subscribers.is_empty();
                if left && matches!(entry.state, SessionState::Pending) {
                    tracing::debug!(username = %username, "Pending session has no watchers left");
                    return None;
                }
                left.then(|| username.clone())
            })
            .collect();

        for username in &emptied {
            if let Some(entry) = entries.remove(username) {
                entry.close();
                tracing::info!(username = %username, "Closed session with no watchers");
            }
        }

        emptied
    }

    /// Close every session; used on server shutdown
    pub async fn shutdown(&self) {
        let mut entries = self.shared.entries.lock().await;
        let count = entries.len();
        for (_, entry) in entries.drain() {
            entry.close();
        }
        tracing::info!(sessions = count, "Registry shut down");
    }

    /// Number of sessions, pending or active
    pub async fn session_count(&self) -> usize {
        self.shared.entries.lock().await.len()
    }

    /// Number of connections watching `username`
    pub async fn subscriber_count(&self, username: &str) -> usize {
        self.shared
            .entries
            .lock()
            .await
            .get(username)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Whether `username` has a connected upstream session
    pub async fn is_active(&self, username: &str) -> bool {
        matches!(
            self.shared.entries.lock().await.get(username),
            Some(Entry {
                state: SessionState::Active(_),
                ..
            })
        )
    }

    /// Watched usernames, sorted
    pub async fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .entries
            .lock()
            .await
            .keys()
            .map(|u| u.to_string())
            .collect();
        names.sort();
        names
    }
}

async fn connect_session(
    registry: RegistryRef,
    connector: Arc<dyn UpstreamConnector>,
    username: Username,
    generation: u64,
    events: EventSender,
    requester: ConnectionId,
) -> RegistryResult<WatchOutcome> {
    match connector.connect(username.as_str(), events).await {
        Ok(session) => registry.activate(&username, generation, session).await,
        Err(e) => {
            let reason = e.to_string();
            tracing::warn!(username = %username, error = %reason, "Upstream connect failed");
            registry
                .fail_pending(&username, generation, &reason, &requester)
                .await;
            Err(RegistryError::ConnectFailure {
                username: username.to_string(),
                reason,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::testing::ScriptedConnector;
    use crate::upstream::UpstreamEvent;
    use crate::websocket::HubConfig;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        registry: Arc<SubscriptionRegistry>,
        hub: Arc<ConnectionHub>,
        connector: ScriptedConnector,
    }

    fn harness() -> Harness {
        let hub = Arc::new(ConnectionHub::new(HubConfig::default()));
        let connector = ScriptedConnector::new();
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::new(connector.clone()),
            Arc::clone(&hub),
        ));
        Harness {
            registry,
            hub,
            connector,
        }
    }

    async fn client(hub: &ConnectionHub) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();
        (id, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_invalid_username_creates_nothing() {
        let h = harness();
        let (a, _rx) = client(&h.hub).await;

        for raw in ["", "   ", "@", " @ "] {
            let result = h.registry.watch(&a, raw).await;
            assert!(matches!(result, Err(RegistryError::InvalidInput)));
        }

        assert_eq!(h.registry.session_count().await, 0);
        assert_eq!(h.connector.attempts(""), 0);
    }

    #[tokio::test]
    async fn test_shared_session_lifecycle() {
        let h = harness();
        let (a, mut rx_a) = client(&h.hub).await;
        let (b, mut rx_b) = client(&h.hub).await;

        let outcome = h.registry.watch(&a, "@alice").await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Connected(_)));
        let outcome = h.registry.watch(&b, "alice").await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Joined(_)));

        assert_eq!(h.connector.attempts("alice"), 1);
        assert_eq!(h.registry.session_count().await, 1);
        assert_eq!(h.registry.subscriber_count("alice").await, 2);

        let chat = json!({"uniqueId": "viewer1", "comment": "hello"});
        h.connector.emit("alice", UpstreamEvent::Chat(chat.clone()));
        assert_eq!(recv(&mut rx_a).await, ServerMessage::Chat(chat.clone()));
        assert_eq!(recv(&mut rx_b).await, ServerMessage::Chat(chat));

        // A leaves; B keeps receiving and the session stays.
        assert!(h.registry.unwatch(&a).await.is_empty());
        assert!(h.registry.is_active("alice").await);

        let like = json!({"likeCount": 3});
        h.connector.emit("alice", UpstreamEvent::Like(like.clone()));
        assert_eq!(recv(&mut rx_b).await, ServerMessage::Like(like));
        assert!(rx_a.try_recv().is_err());

        // B leaves; the session is closed once.
        let closed = h.registry.unwatch(&b).await;
        assert_eq!(closed, vec![Username::parse("alice").unwrap()]);
        assert_eq!(h.registry.session_count().await, 0);
        assert_eq!(h.connector.disconnects("alice"), 1);

        assert!(h.registry.unwatch(&b).await.is_empty());
        assert_eq!(h.connector.disconnects("alice"), 1);
    }

    #[tokio::test]
    async fn test_events_are_not_retroactive() {
        let h = harness();
        let (a, mut rx_a) = client(&h.hub).await;
        let (b, mut rx_b) = client(&h.hub).await;

        h.registry.watch(&a, "alice").await.unwrap();
        h.connector
            .emit("alice", UpstreamEvent::Viewer(json!({"viewerCount": 1})));
        recv(&mut rx_a).await;

        h.registry.watch(&b, "alice").await.unwrap();
        h.connector
            .emit("alice", UpstreamEvent::Viewer(json!({"viewerCount": 2})));

        assert_eq!(
            recv(&mut rx_b).await,
            ServerMessage::Viewer(json!({"viewerCount": 2}))
        );
        assert_eq!(
            recv(&mut rx_a).await,
            ServerMessage::Viewer(json!({"viewerCount": 2}))
        );
    }

    #[tokio::test]
    async fn test_concurrent_first_watchers_share_failure() {
        let h = harness();
        let (a, mut rx_a) = client(&h.hub).await;
        let (b, mut rx_b) = client(&h.hub).await;
        h.connector.fail("bob");
        h.connector.hold("bob");

        let registry = Arc::clone(&h.registry);
        let a_id = a.clone();
        let first = tokio::spawn(async move { registry.watch(&a_id, "bob").await });
        h.connector.wait_for_waiting(1).await;

        // Second watcher joins the placeholder instead of connecting again.
        let second = h.registry.watch(&b, "bob").await.unwrap();
        assert!(matches!(second, WatchOutcome::Joined(_)));
        assert!(!h.registry.is_active("bob").await);

        h.connector.release();
        let first = first.await.unwrap();
        assert!(matches!(first, Err(RegistryError::ConnectFailure { .. })));

        match recv(&mut rx_b).await {
            ServerMessage::Status(status) => {
                assert!(!status.ok);
                assert_eq!(status.msg, "failed to connect");
                assert_eq!(status.err.as_deref(), Some("Connection failed: bob is offline"));
            }
            other => panic!("Expected Status, got {:?}", other),
        }
        // The requester gets the error as a return value, not a message.
        assert!(rx_a.try_recv().is_err());

        assert_eq!(h.connector.attempts("bob"), 1);
        assert_eq!(h.registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_watchers_share_success() {
        let h = harness();
        let (a, _rx_a) = client(&h.hub).await;
        let (b, _rx_b) = client(&h.hub).await;
        h.connector.hold("bob");

        let registry = Arc::clone(&h.registry);
        let a_id = a.clone();
        let first = tokio::spawn(async move { registry.watch(&a_id, "bob").await });
        h.connector.wait_for_waiting(1).await;

        h.registry.watch(&b, "@bob").await.unwrap();
        h.connector.release();

        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, WatchOutcome::Connected(_)));
        assert_eq!(h.connector.attempts("bob"), 1);
        assert!(h.registry.is_active("bob").await);
        assert_eq!(h.registry.subscriber_count("bob").await, 2);
    }

    #[tokio::test]
    async fn test_connect_completing_after_everyone_left() {
        let h = harness();
        let (a, _rx_a) = client(&h.hub).await;
        h.connector.hold("dave");

        let registry = Arc::clone(&h.registry);
        let a_id = a.clone();
        let first = tokio::spawn(async move { registry.watch(&a_id, "dave").await });
        h.connector.wait_for_waiting(1).await;

        // The placeholder stays reserved while the connect is in flight.
        assert!(h.registry.unwatch(&a).await.is_empty());
        assert_eq!(h.registry.session_count().await, 1);
        assert_eq!(h.registry.subscriber_count("dave").await, 0);

        h.connector.release();
        let result = first.await.unwrap();
        assert!(matches!(result, Err(RegistryError::Abandoned(_))));
        assert_eq!(h.connector.disconnects("dave"), 1);
        assert_eq!(h.registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_rewatch_while_abandoned_connect_in_flight() {
        let h = harness();
        let (a, _rx_a) = client(&h.hub).await;
        let (b, _rx_b) = client(&h.hub).await;
        h.connector.hold("dave");

        let registry = Arc::clone(&h.registry);
        let a_id = a.clone();
        let first = tokio::spawn(async move { registry.watch(&a_id, "dave").await });
        h.connector.wait_for_waiting(1).await;

        h.registry.unwatch(&a).await;

        // B joins the in-flight connect instead of starting a second one.
        let outcome = h.registry.watch(&b, "dave").await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Joined(_)));
        assert_eq!(h.connector.attempts("dave"), 1);
        assert_eq!(h.connector.waiting(), 1);

        h.connector.release();
        assert!(matches!(first.await.unwrap(), Ok(WatchOutcome::Connected(_))));
        assert!(h.registry.is_active("dave").await);
        assert_eq!(h.registry.subscriber_count("dave").await, 1);
        assert_eq!(h.connector.disconnects("dave"), 0);

        let closed = h.registry.unwatch(&b).await;
        assert_eq!(closed, vec![Username::parse("dave").unwrap()]);
        assert_eq!(h.connector.disconnects("dave"), 1);
    }

    #[tokio::test]
    async fn test_unwatch_sweeps_every_username() {
        let h = harness();
        let (a, _rx_a) = client(&h.hub).await;
        let (b, _rx_b) = client(&h.hub).await;

        h.registry.watch(&a, "alice").await.unwrap();
        h.registry.watch(&a, "carol").await.unwrap();
        h.registry.watch(&b, "carol").await.unwrap();

        let closed = h.registry.unwatch(&a).await;
        assert_eq!(closed, vec![Username::parse("alice").unwrap()]);
        assert_eq!(h.registry.usernames().await, vec!["carol".to_string()]);
        assert_eq!(h.registry.subscriber_count("carol").await, 1);
        assert_eq!(h.connector.disconnects("alice"), 1);
        assert_eq!(h.connector.disconnects("carol"), 0);
    }

    #[tokio::test]
    async fn test_upstream_error_keeps_session() {
        let h = harness();
        let (a, mut rx_a) = client(&h.hub).await;
        h.registry.watch(&a, "alice").await.unwrap();

        h.connector
            .emit("alice", UpstreamEvent::Error("websocket hiccup".to_string()));
        assert_eq!(
            recv(&mut rx_a).await,
            ServerMessage::Status(StatusPayload::failed("connector error").err("websocket hiccup"))
        );

        assert!(h.registry.is_active("alice").await);
        assert_eq!(h.registry.subscriber_count("alice").await, 1);

        h.connector
            .emit("alice", UpstreamEvent::Gift(json!({"giftId": 1})));
        assert_eq!(recv(&mut rx_a).await, ServerMessage::Gift(json!({"giftId": 1})));
    }

    #[tokio::test]
    async fn test_rewatch_after_close_opens_new_session() {
        let h = harness();
        let (a, _rx_a) = client(&h.hub).await;

        h.registry.watch(&a, "alice").await.unwrap();
        h.registry.unwatch(&a).await;
        let outcome = h.registry.watch(&a, "alice").await.unwrap();

        assert!(matches!(outcome, WatchOutcome::Connected(_)));
        assert_eq!(h.connector.attempts("alice"), 2);
        assert_eq!(h.connector.disconnects("alice"), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_no_entry() {
        let h = harness();
        let (a, _rx_a) = client(&h.hub).await;
        h.connector.fail("erin");

        let result = h.registry.watch(&a, "erin").await;
        assert!(matches!(result, Err(RegistryError::ConnectFailure { .. })));
        assert_eq!(h.registry.session_count().await, 0);

        // A later watch tries again rather than finding a stale entry.
        let _ = h.registry.watch(&a, "erin").await;
        assert_eq!(h.connector.attempts("erin"), 2);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_all() {
        let h = harness();
        let (a, _rx_a) = client(&h.hub).await;
        h.registry.watch(&a, "alice").await.unwrap();
        h.registry.watch(&a, "carol").await.unwrap();

        h.registry.shutdown().await;

        assert_eq!(h.registry.session_count().await, 0);
        assert_eq!(h.connector.disconnects("alice"), 1);
        assert_eq!(h.connector.disconnects("carol"), 1);
    }
}
