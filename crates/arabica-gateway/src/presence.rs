//! Presence and typing coordinator for the employee chat socket.
//!
//! Owns every live connection (grouped by identity), the per-identity
//! `lastSeen`, and the per-(chat, identity) typing timers. Each connection is
//! an unbounded channel drained by its socket task; the coordinator never
//! touches a socket directly. State sits behind one mutex that is never held
//! across an `.await`.
//!
//! Presence is per identity: the first connection broadcasts online, the last
//! one to close broadcasts offline. Broadcasts skip every connection of the
//! originating identity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arabica_core::{ArabicaError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub type ConnId = u64;

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    TypingStart {
        #[serde(default)]
        chat_id: Option<String>,
    },
    TypingStop {
        #[serde(default)]
        chat_id: Option<String>,
    },
    /// Accepted and logged; chat membership is not tracked.
    SubscribeChat {
        #[serde(default)]
        chat_id: Option<String>,
    },
    GetOnlineUsers,
    Ping,
}

/// An identity currently online.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub identity: String,
    pub last_seen: DateTime<Utc>,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Connected {
        identity: String,
        timestamp: DateTime<Utc>,
    },
    OnlineStatus {
        identity: String,
        is_online: bool,
        timestamp: DateTime<Utc>,
    },
    Typing {
        chat_id: String,
        identity: String,
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },
    OnlineUsersList {
        users: Vec<OnlineUser>,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    NewMessage {
        chat_id: String,
        message: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    MessageDeleted {
        chat_id: String,
        message_id: String,
        timestamp: DateTime<Utc>,
    },
    ChatCleared {
        chat_id: String,
        deleted_count: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Strip whitespace and `+` from a phone-style identity. `None` if nothing is left.
pub fn normalize_identity(raw: &str) -> Option<String> {
    let identity: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '+').collect();
    (!identity.is_empty()).then_some(identity)
}

/// A registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub identity: String,
    pub id: ConnId,
}

struct TypingEntry {
    generation: u64,
    /// Connection that last sent `typing_start`.
    origin: ConnId,
    timer: AbortHandle,
}

type TypingKey = (String, String);

#[derive(Default)]
struct Inner {
    connections: HashMap<String, HashMap<ConnId, mpsc::UnboundedSender<ServerEvent>>>,
    last_seen: HashMap<String, DateTime<Utc>>,
    typing: HashMap<TypingKey, TypingEntry>,
}

impl Inner {
    fn broadcast_except(&self, identity: &str, event: &ServerEvent) {
        for (peer, conns) in &self.connections {
            if peer == identity {
                continue;
            }
            for tx in conns.values() {
                // A closed receiver just means that socket is on its way out.
                let _ = tx.send(event.clone());
            }
        }
    }

    fn broadcast_all(&self, event: &ServerEvent) {
        for tx in self.connections.values().flat_map(|c| c.values()) {
            let _ = tx.send(event.clone());
        }
    }

    fn send_to(&self, conn: &Connection, event: ServerEvent) {
        if let Some(tx) = self.connections.get(&conn.identity).and_then(|c| c.get(&conn.id)) {
            let _ = tx.send(event);
        }
    }

    fn typing_stopped(&self, chat_id: &str, identity: &str) {
        self.broadcast_except(
            identity,
            &ServerEvent::Typing {
                chat_id: chat_id.to_string(),
                identity: identity.to_string(),
                is_typing: false,
                timestamp: Utc::now(),
            },
        );
    }
}

/// Coordinator for every live chat connection.
pub struct PresenceCoordinator {
    inner: Mutex<Inner>,
    typing_ttl: Duration,
    next_id: AtomicU64,
    next_generation: AtomicU64,
    weak_self: Weak<PresenceCoordinator>,
}

impl PresenceCoordinator {
    pub fn new(typing_ttl: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            inner: Mutex::new(Inner::default()),
            typing_ttl,
            next_id: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            weak_self: weak_self.clone(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a connection. The returned receiver yields everything to be
    /// written to that socket, starting with `connected`.
    pub fn connect(&self, raw_identity: &str) -> Result<(Connection, mpsc::UnboundedReceiver<ServerEvent>)> {
        let identity = normalize_identity(raw_identity)
            .ok_or_else(|| ArabicaError::Validation("Phone required".into()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Utc::now();
        let conn = Connection { identity, id };

        let mut inner = self.lock();
        let conns = inner.connections.entry(conn.identity.clone()).or_default();
        let first = conns.is_empty();
        conns.insert(id, tx);
        inner.last_seen.insert(conn.identity.clone(), now);
        inner.send_to(
            &conn,
            ServerEvent::Connected {
                identity: conn.identity.clone(),
                timestamp: now,
            },
        );
        if first {
            inner.broadcast_except(
                &conn.identity,
                &ServerEvent::OnlineStatus {
                    identity: conn.identity.clone(),
                    is_online: true,
                    timestamp: now,
                },
            );
        }
        drop(inner);

        tracing::info!(identity = %conn.identity, conn = id, "📱 Chat socket connected");
        Ok((conn, rx))
    }

    /// Remove a connection. Typing it started is stopped; if it was the
    /// identity's last connection, offline is broadcast once. Calling it twice
    /// is harmless.
    pub fn disconnect(&self, conn: &Connection) {
        let now = Utc::now();
        let mut inner = self.lock();
        let Some(conns) = inner.connections.get_mut(&conn.identity) else {
            return;
        };
        if conns.remove(&conn.id).is_none() {
            return;
        }
        let last = conns.is_empty();

        let stale: Vec<TypingKey> = inner
            .typing
            .iter()
            .filter(|((_, who), entry)| *who == conn.identity && entry.origin == conn.id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(entry) = inner.typing.remove(&key) {
                entry.timer.abort();
                inner.typing_stopped(&key.0, &key.1);
            }
        }

        inner.last_seen.insert(conn.identity.clone(), now);
        if last {
            inner.connections.remove(&conn.identity);
            inner.broadcast_except(
                &conn.identity,
                &ServerEvent::OnlineStatus {
                    identity: conn.identity.clone(),
                    is_online: false,
                    timestamp: now,
                },
            );
        }
        drop(inner);

        tracing::info!(identity = %conn.identity, conn = conn.id, last, "📴 Chat socket disconnected");
    }

    /// Heartbeat acknowledged.
    pub fn touch(&self, identity: &str) {
        let mut inner = self.lock();
        if inner.connections.contains_key(identity) {
            inner.last_seen.insert(identity.to_string(), Utc::now());
        }
    }

    pub fn handle_message(&self, conn: &Connection, message: ClientMessage) {
        match message {
            ClientMessage::TypingStart { chat_id: Some(chat_id) } => self.typing_start(conn, &chat_id),
            ClientMessage::TypingStop { chat_id: Some(chat_id) } => self.typing_stop(&conn.identity, &chat_id),
            ClientMessage::TypingStart { chat_id: None } | ClientMessage::TypingStop { chat_id: None } => {
                tracing::debug!(identity = %conn.identity, "typing event without chatId ignored");
            }
            ClientMessage::SubscribeChat { chat_id } => {
                tracing::info!(identity = %conn.identity, chat = ?chat_id, "📝 Subscribed to chat");
            }
            ClientMessage::GetOnlineUsers => {
                let users = self.online_users();
                self.lock().send_to(
                    conn,
                    ServerEvent::OnlineUsersList {
                        users,
                        timestamp: Utc::now(),
                    },
                );
            }
            ClientMessage::Ping => {
                self.lock().send_to(conn, ServerEvent::Pong { timestamp: Utc::now() });
            }
        }
    }

    /// (Re)arm the typing timer for (chat, identity) and broadcast `isTyping: true`.
    pub fn typing_start(&self, conn: &Connection, chat_id: &str) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let key = (chat_id.to_string(), conn.identity.clone());

        let weak = self.weak_self.clone();
        let ttl = self.typing_ttl;
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(this) = weak.upgrade() {
                this.expire_typing(&timer_key, generation);
            }
        })
        .abort_handle();

        let mut inner = self.lock();
        if !inner.connections.contains_key(&conn.identity) {
            timer.abort();
            return;
        }
        let entry = TypingEntry {
            generation,
            origin: conn.id,
            timer,
        };
        if let Some(previous) = inner.typing.insert(key, entry) {
            previous.timer.abort();
        }
        inner.broadcast_except(
            &conn.identity,
            &ServerEvent::Typing {
                chat_id: chat_id.to_string(),
                identity: conn.identity.clone(),
                is_typing: true,
                timestamp: Utc::now(),
            },
        );
    }

    /// Clear typing for (chat, identity). Broadcasts only if it was set.
    pub fn typing_stop(&self, identity: &str, chat_id: &str) {
        let mut inner = self.lock();
        if let Some(entry) = inner.typing.remove(&(chat_id.to_string(), identity.to_string())) {
            entry.timer.abort();
            inner.typing_stopped(chat_id, identity);
        }
    }

    fn expire_typing(&self, key: &TypingKey, generation: u64) {
        let mut inner = self.lock();
        // A newer typing_start replaced this timer while it was firing.
        if inner.typing.get(key).is_none_or(|e| e.generation != generation) {
            return;
        }
        inner.typing.remove(key);
        inner.typing_stopped(&key.0, &key.1);
        tracing::debug!(chat = %key.0, identity = %key.1, "⌛ Typing expired");
    }

    pub fn is_typing(&self, identity: &str, chat_id: &str) -> bool {
        self.lock()
            .typing
            .contains_key(&(chat_id.to_string(), identity.to_string()))
    }

    pub fn is_online(&self, raw_identity: &str) -> bool {
        normalize_identity(raw_identity).is_some_and(|id| self.lock().connections.contains_key(&id))
    }

    /// Online identities with their last-seen time, sorted by identity.
    pub fn online_users(&self) -> Vec<OnlineUser> {
        let inner = self.lock();
        let mut users: Vec<OnlineUser> = inner
            .connections
            .keys()
            .map(|identity| OnlineUser {
                identity: identity.clone(),
                last_seen: inner.last_seen.get(identity).copied().unwrap_or_else(Utc::now),
            })
            .collect();
        users.sort_by(|a, b| a.identity.cmp(&b.identity));
        users
    }

    /// Live connections across all identities.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.values().map(HashMap::len).sum()
    }

    // ── Events pushed by the REST chat layer ─────────────

    pub fn notify_new_message(&self, chat_id: &str, message: serde_json::Value, sender: Option<&str>) {
        let event = ServerEvent::NewMessage {
            chat_id: chat_id.to_string(),
            message,
            timestamp: Utc::now(),
        };
        let inner = self.lock();
        match sender.and_then(normalize_identity) {
            Some(sender) => inner.broadcast_except(&sender, &event),
            None => inner.broadcast_all(&event),
        }
        tracing::debug!(chat = chat_id, "📤 new_message fanned out");
    }

    pub fn notify_message_deleted(&self, chat_id: &str, message_id: &str) {
        self.lock().broadcast_all(&ServerEvent::MessageDeleted {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn notify_chat_cleared(&self, chat_id: &str, deleted_count: usize) {
        self.lock().broadcast_all(&ServerEvent::ChatCleared {
            chat_id: chat_id.to_string(),
            deleted_count,
            timestamp: Utc::now(),
        });
    }

    /// Drop every connection and cancel every typing timer. Socket tasks see
    /// their channel close and shut their sockets.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        for (_, entry) in inner.typing.drain() {
            entry.timer.abort();
        }
        let dropped: usize = inner.connections.values().map(HashMap::len).sum();
        inner.connections.clear();
        tracing::info!("Presence coordinator shut down ({dropped} connection(s) dropped)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn typing_flags(events: &[ServerEvent], who: &str) -> Vec<bool> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::Typing { identity, is_typing, .. } if identity == who => Some(*is_typing),
                _ => None,
            })
            .collect()
    }

    fn online_flags(events: &[ServerEvent], who: &str) -> Vec<bool> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::OnlineStatus { identity, is_online, .. } if identity == who => Some(*is_online),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_normalize_identity() {
        assert_eq!(normalize_identity("+7 900 111 22 33").as_deref(), Some("79001112233"));
        assert_eq!(normalize_identity(" + "), None);
        assert_eq!(normalize_identity(""), None);
    }

    #[tokio::test]
    async fn test_missing_identity_is_refused() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        assert!(matches!(hub.connect("  "), Err(ArabicaError::Validation(_))));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_connected_then_online_broadcast_to_others() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        let (_b, mut rx_b) = hub.connect("b").unwrap();
        drain(&mut rx_b);

        let (a, mut rx_a) = hub.connect("+a").unwrap();
        assert_eq!(a.identity, "a");
        let own = drain(&mut rx_a);
        assert!(matches!(&own[..], [ServerEvent::Connected { identity, .. }] if identity == "a"));
        assert_eq!(online_flags(&drain(&mut rx_b), "a"), vec![true]);
    }

    #[tokio::test]
    async fn test_multi_device_presence() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        let (_b, mut rx_b) = hub.connect("b").unwrap();
        let (a1, _rx_a1) = hub.connect("a").unwrap();
        let (a2, _rx_a2) = hub.connect("a").unwrap();
        assert_eq!(online_flags(&drain(&mut rx_b), "a"), vec![true], "second device is silent");
        assert_eq!(hub.connection_count(), 3);

        hub.disconnect(&a1);
        assert!(hub.is_online("a"));
        assert!(online_flags(&drain(&mut rx_b), "a").is_empty());

        hub.disconnect(&a2);
        hub.disconnect(&a2);
        assert!(!hub.is_online("a"));
        assert_eq!(online_flags(&drain(&mut rx_b), "a"), vec![false], "exactly one offline event");
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_expires_after_ttl() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        let (a, mut rx_a) = hub.connect("a").unwrap();
        let (_b, mut rx_b) = hub.connect("b").unwrap();
        drain(&mut rx_b);

        hub.handle_message(&a, ClientMessage::TypingStart { chat_id: Some("c1".into()) });
        assert_eq!(typing_flags(&drain(&mut rx_b), "a"), vec![true]);
        assert!(typing_flags(&drain(&mut rx_a), "a").is_empty(), "no echo to the typist");

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(hub.is_typing("a", "c1"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!hub.is_typing("a", "c1"));
        assert_eq!(typing_flags(&drain(&mut rx_b), "a"), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_start_refreshes_timer() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        let (a, _rx_a) = hub.connect("a").unwrap();
        let (_b, mut rx_b) = hub.connect("b").unwrap();

        hub.typing_start(&a, "c1");
        tokio::time::sleep(Duration::from_secs(3)).await;
        hub.typing_start(&a, "c1");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(hub.is_typing("a", "c1"), "refreshed at t=3s, still typing at t=6s");

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert!(!hub.is_typing("a", "c1"));
        assert_eq!(typing_flags(&drain(&mut rx_b), "a"), vec![true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_typing_immediately() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        let (a, _rx_a) = hub.connect("a").unwrap();
        let (_b, mut rx_b) = hub.connect("b").unwrap();
        drain(&mut rx_b);

        hub.typing_start(&a, "c1");
        tokio::time::sleep(Duration::from_secs(2)).await;
        hub.disconnect(&a);

        let events = drain(&mut rx_b);
        assert_eq!(typing_flags(&events, "a"), vec![true, false]);
        assert_eq!(online_flags(&events, "a"), vec![false]);

        // The aborted timer never produces a second stop.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_expiry_are_idempotent() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        let (a, _rx_a) = hub.connect("a").unwrap();
        let (_b, mut rx_b) = hub.connect("b").unwrap();

        hub.typing_start(&a, "c1");
        hub.typing_stop("a", "c1");
        hub.typing_stop("a", "c1");
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(typing_flags(&drain(&mut rx_b), "a"), vec![true, false]);
    }

    #[tokio::test]
    async fn test_other_device_keeps_its_typing() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        let (phone, _rx1) = hub.connect("a").unwrap();
        let (tablet, _rx2) = hub.connect("a").unwrap();

        hub.typing_start(&tablet, "c1");
        hub.disconnect(&phone);
        assert!(hub.is_typing("a", "c1"));
        hub.disconnect(&tablet);
        assert!(!hub.is_typing("a", "c1"));
    }

    #[tokio::test]
    async fn test_online_users_and_ping() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        let (a, mut rx_a) = hub.connect("a").unwrap();
        let (_b, _rx_b) = hub.connect("b").unwrap();
        drain(&mut rx_a);

        hub.handle_message(&a, ClientMessage::GetOnlineUsers);
        hub.handle_message(&a, ClientMessage::Ping);
        let events = drain(&mut rx_a);
        match &events[..] {
            [ServerEvent::OnlineUsersList { users, .. }, ServerEvent::Pong { .. }] => {
                let ids: Vec<_> = users.iter().map(|u| u.identity.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chat_events() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        let (_a, mut rx_a) = hub.connect("a").unwrap();
        let (_b, mut rx_b) = hub.connect("b").unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.notify_new_message("c1", serde_json::json!({"text": "hi"}), Some("+a"));
        assert!(drain(&mut rx_a).is_empty());
        assert!(matches!(&drain(&mut rx_b)[..], [ServerEvent::NewMessage { .. }]));

        hub.notify_message_deleted("c1", "m1");
        hub.notify_chat_cleared("c1", 3);
        assert_eq!(drain(&mut rx_a).len(), 2);
        assert_eq!(drain(&mut rx_b).len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_channels() {
        let hub = PresenceCoordinator::new(Duration::from_secs(5));
        let (a, mut rx_a) = hub.connect("a").unwrap();
        hub.typing_start(&a, "c1");
        hub.shutdown();
        drain(&mut rx_a);
        assert!(rx_a.recv().await.is_none());
        assert_eq!(hub.connection_count(), 0);
        assert!(!hub.is_typing("a", "c1"));
    }

    #[test]
    fn test_wire_format() {
        let event = ServerEvent::Typing {
            chat_id: "c1".into(),
            identity: "a".into(),
            is_typing: true,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["chatId"], "c1");
        assert_eq!(json["isTyping"], true);

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"typing_start","chatId":"c1"}"#).unwrap();
        assert_eq!(msg, ClientMessage::TypingStart { chat_id: Some("c1".into()) });
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"get_online_users"}"#).unwrap();
        assert_eq!(msg, ClientMessage::GetOnlineUsers);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }
}
