//! Realtime bus: routes status, log, stats, and artifact events to
//! subscribed clients.
//!
//! Transports (WebSocket handlers, the CLI) register a connection and get an
//! mpsc receiver; producers address missions, users, sessions, or single
//! connections. One background task drains the delivery queue in order, so
//! per-mission producer order is preserved; duplicates inside a one-second
//! window are suppressed by content hash; connections that stay full past the
//! retry budget are dropped; a sweeper closes connections silent for five
//! minutes. Writing sessions keep a single live connection per session id.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use mission_event::{content_hash, Envelope, MissionEvent};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::BusError;

/// Connection kind registered by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Research,
    Writing,
    Document,
}

/// Delivery attempts per message per connection before the connection is dropped.
const MAX_DELIVERY_RETRIES: u32 = 3;
/// Suppression window for identical (content, targets) pairs.
const DEDUP_WINDOW: Duration = Duration::from_secs(1);
/// Connections silent for this long are closed by the sweeper.
const STALE_AFTER: Duration = Duration::from_secs(5 * 60);
/// Outbound channel capacity per connection.
const CONNECTION_QUEUE_SIZE: usize = 256;

struct Connection {
    user_id: String,
    connection_type: ConnectionType,
    session_id: Option<String>,
    missions: HashSet<String>,
    tx: mpsc::Sender<Value>,
    last_seen: Instant,
}

struct QueuedMessage {
    payload: Value,
    targets: Vec<String>,
}

/// Event sink seam: the context store and tools emit through this without
/// depending on bus internals.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, mission_id: &str, event: MissionEvent);
}

/// The process-wide realtime bus.
pub struct RealtimeBus {
    connections: DashMap<String, Connection>,
    user_index: DashMap<String, HashSet<String>>,
    session_index: DashMap<String, HashSet<String>>,
    mission_index: DashMap<String, HashSet<String>>,
    dedup: Mutex<std::collections::HashMap<u64, Instant>>,
    queue_tx: mpsc::UnboundedSender<QueuedMessage>,
}

impl RealtimeBus {
    /// Creates the bus and spawns the delivery and sweeper tasks.
    /// Requires a running tokio runtime.
    pub fn new() -> std::sync::Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let bus = std::sync::Arc::new(Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            session_index: DashMap::new(),
            mission_index: DashMap::new(),
            dedup: Mutex::new(std::collections::HashMap::new()),
            queue_tx,
        });
        tokio::spawn(Self::delivery_loop(bus.clone(), queue_rx));
        tokio::spawn(Self::sweeper_loop(bus.clone()));
        bus
    }

    /// Registers a connection; returns its id and the receiver the transport
    /// drains into its socket. For writing sessions any previous connection
    /// with the same session id is closed first.
    pub fn connect(
        &self,
        user_id: impl Into<String>,
        connection_type: ConnectionType,
        session_id: Option<String>,
    ) -> (String, mpsc::Receiver<Value>) {
        let user_id = user_id.into();
        if connection_type == ConnectionType::Writing {
            if let Some(sid) = &session_id {
                let existing: Vec<String> = self
                    .session_index
                    .get(sid)
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default();
                for conn_id in existing {
                    tracing::info!(connection = %conn_id, session = %sid, "closing duplicate writing connection");
                    self.disconnect(&conn_id);
                }
            }
        }

        let connection_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CONNECTION_QUEUE_SIZE);
        self.connections.insert(
            connection_id.clone(),
            Connection {
                user_id: user_id.clone(),
                connection_type,
                session_id: session_id.clone(),
                missions: HashSet::new(),
                tx,
                last_seen: Instant::now(),
            },
        );
        self.user_index
            .entry(user_id)
            .or_default()
            .insert(connection_id.clone());
        if let Some(sid) = session_id {
            self.session_index
                .entry(sid)
                .or_default()
                .insert(connection_id.clone());
        }
        (connection_id, rx)
    }

    /// Removes a connection from every index; its receiver sees the channel close.
    pub fn disconnect(&self, connection_id: &str) {
        let Some((_, conn)) = self.connections.remove(connection_id) else {
            return;
        };
        if let Some(mut set) = self.user_index.get_mut(&conn.user_id) {
            set.remove(connection_id);
        }
        if let Some(sid) = &conn.session_id {
            if let Some(mut set) = self.session_index.get_mut(sid) {
                set.remove(connection_id);
            }
        }
        for mission in &conn.missions {
            if let Some(mut set) = self.mission_index.get_mut(mission) {
                set.remove(connection_id);
            }
        }
    }

    pub fn subscribe(&self, connection_id: &str, mission_id: &str) -> Result<(), BusError> {
        let mut conn = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| BusError::UnknownConnection(connection_id.to_string()))?;
        conn.missions.insert(mission_id.to_string());
        self.mission_index
            .entry(mission_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        Ok(())
    }

    pub fn unsubscribe(&self, connection_id: &str, mission_id: &str) -> Result<(), BusError> {
        let mut conn = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| BusError::UnknownConnection(connection_id.to_string()))?;
        conn.missions.remove(mission_id);
        if let Some(mut set) = self.mission_index.get_mut(mission_id) {
            set.remove(connection_id);
        }
        Ok(())
    }

    /// Marks activity (transport ping); stale sweeping keys off this.
    pub fn touch(&self, connection_id: &str) {
        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.last_seen = Instant::now();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Sends an event to every connection subscribed to the mission.
    pub fn send_to_mission(&self, mission_id: &str, event: &MissionEvent) {
        let targets: Vec<String> = self
            .mission_index
            .get(mission_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        self.dispatch(event, targets, Some(mission_id), None);
    }

    /// Sends an event to all of a user's connections.
    pub fn send_to_user(&self, user_id: &str, event: &MissionEvent) {
        let targets: Vec<String> = self
            .user_index
            .get(user_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        self.dispatch(event, targets, None, None);
    }

    /// Sends an event to all connections of a writing session.
    pub fn send_to_session(&self, session_id: &str, event: &MissionEvent) {
        let targets: Vec<String> = self
            .session_index
            .get(session_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        self.dispatch(event, targets, None, Some(session_id));
    }

    /// Sends an event to one connection.
    pub fn send_to_connection(&self, connection_id: &str, event: &MissionEvent) {
        self.dispatch(event, vec![connection_id.to_string()], None, None);
    }

    fn dispatch(
        &self,
        event: &MissionEvent,
        targets: Vec<String>,
        mission_id: Option<&str>,
        session_id: Option<&str>,
    ) {
        if targets.is_empty() {
            return;
        }
        let Ok(mut payload) = event.to_value() else {
            tracing::warn!("unserializable mission event dropped");
            return;
        };
        let mut envelope = Envelope::new()
            .with_msg_id(uuid::Uuid::new_v4().to_string())
            .with_timestamp(Utc::now().to_rfc3339());
        if let Some(m) = mission_id {
            envelope = envelope.with_mission_id(m);
        }
        if let Some(s) = session_id {
            envelope = envelope.with_session_id(s);
        }
        envelope.inject_into(&mut payload);

        if self.is_duplicate(&payload, &targets) {
            tracing::debug!(event = event.type_tag(), "suppressed duplicate event");
            return;
        }
        let _ = self.queue_tx.send(QueuedMessage { payload, targets });
    }

    fn is_duplicate(&self, payload: &Value, targets: &[String]) -> bool {
        let hash = content_hash(payload, targets);
        let now = Instant::now();
        let mut cache = self.dedup.lock().expect("dedup lock");
        cache.retain(|_, seen| now.duration_since(*seen) < DEDUP_WINDOW);
        match cache.get(&hash) {
            Some(seen) if now.duration_since(*seen) < DEDUP_WINDOW => true,
            _ => {
                cache.insert(hash, now);
                false
            }
        }
    }

    async fn delivery_loop(
        bus: std::sync::Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<QueuedMessage>,
    ) {
        while let Some(msg) = rx.recv().await {
            for target in &msg.targets {
                bus.deliver_one(target, &msg.payload).await;
            }
        }
    }

    async fn deliver_one(&self, connection_id: &str, payload: &Value) {
        for attempt in 0..=MAX_DELIVERY_RETRIES {
            let tx = match self.connections.get(connection_id) {
                Some(conn) => conn.tx.clone(),
                None => return,
            };
            match tx.try_send(payload.clone()) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.disconnect(connection_id);
                    return;
                }
                Err(mpsc::error::TrySendError::Full(_)) if attempt < MAX_DELIVERY_RETRIES => {
                    tokio::time::sleep(Duration::from_millis(50 << attempt)).await;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection = %connection_id,
                        "connection queue full after retries; dropping connection"
                    );
                    self.disconnect(connection_id);
                    return;
                }
            }
        }
    }

    async fn sweeper_loop(bus: std::sync::Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let stale: Vec<String> = bus
                .connections
                .iter()
                .filter(|c| c.last_seen.elapsed() > STALE_AFTER)
                .map(|c| c.key().clone())
                .collect();
            for conn_id in stale {
                tracing::info!(connection = %conn_id, "closing stale connection");
                bus.disconnect(&conn_id);
            }
        }
    }
}

#[async_trait]
impl EventSink for RealtimeBus {
    async fn emit(&self, mission_id: &str, event: MissionEvent) {
        self.send_to_mission(mission_id, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_event(text: &str) -> MissionEvent {
        MissionEvent::LogEntry {
            entry: serde_json::json!({ "action": text }),
        }
    }

    #[tokio::test]
    async fn subscribed_connection_receives_mission_event() {
        let bus = RealtimeBus::new();
        let (conn_id, mut rx) = bus.connect("u1", ConnectionType::Research, None);
        bus.subscribe(&conn_id, "m1").unwrap();

        bus.send_to_mission("m1", &log_event("hello"));
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg["type"], "log_entry");
        assert_eq!(msg["mission_id"], "m1");
        assert!(msg["_msg_id"].is_string());
        assert!(msg["timestamp"].is_string());
    }

    #[tokio::test]
    async fn unsubscribed_connection_gets_nothing() {
        let bus = RealtimeBus::new();
        let (_conn_id, mut rx) = bus.connect("u1", ConnectionType::Research, None);
        bus.send_to_mission("m1", &log_event("ignored"));
        let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(got.is_err(), "expected timeout without delivery");
    }

    #[tokio::test]
    async fn duplicate_within_window_is_suppressed() {
        let bus = RealtimeBus::new();
        let (conn_id, mut rx) = bus.connect("u1", ConnectionType::Research, None);
        bus.subscribe(&conn_id, "m1").unwrap();

        bus.send_to_mission("m1", &log_event("same"));
        bus.send_to_mission("m1", &log_event("same"));

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert!(first.is_some());
        let second = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(second.is_err(), "duplicate should be suppressed");
    }

    #[tokio::test]
    async fn writing_session_keeps_single_connection() {
        let bus = RealtimeBus::new();
        let (old_id, mut old_rx) =
            bus.connect("u1", ConnectionType::Writing, Some("sess-1".into()));
        let (new_id, _new_rx) =
            bus.connect("u1", ConnectionType::Writing, Some("sess-1".into()));
        assert_ne!(old_id, new_id);
        assert_eq!(bus.connection_count(), 1);
        // Old receiver observes channel close.
        let got = tokio::time::timeout(Duration::from_millis(200), old_rx.recv())
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn send_to_user_reaches_all_their_connections() {
        let bus = RealtimeBus::new();
        let (_c1, mut rx1) = bus.connect("u1", ConnectionType::Research, None);
        let (_c2, mut rx2) = bus.connect("u1", ConnectionType::Document, None);
        bus.send_to_user("u1", &log_event("broadcast"));
        assert!(tokio::time::timeout(Duration::from_secs(1), rx1.recv())
            .await
            .unwrap()
            .is_some());
        assert!(tokio::time::timeout(Duration::from_secs(1), rx2.recv())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn disconnect_removes_subscriptions() {
        let bus = RealtimeBus::new();
        let (conn_id, _rx) = bus.connect("u1", ConnectionType::Research, None);
        bus.subscribe(&conn_id, "m1").unwrap();
        bus.disconnect(&conn_id);
        assert_eq!(bus.connection_count(), 0);
        assert!(bus.subscribe(&conn_id, "m1").is_err());
    }
}
