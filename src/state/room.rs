use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use axum::extract::ws::{Message, Utf8Bytes};
use dashmap::DashMap;
use tokio::{
    sync::{Notify, RwLock, mpsc},
    time::Instant,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dto::{event::NormalizedEvent, rooms::UpstreamMode};

/// Shared handle to a relay room.
pub type RoomHandle = Arc<Room>;

/// Handle used to push messages to one connected viewer.
#[derive(Clone)]
pub struct ViewerConnection {
    /// Viewer identifier.
    pub id: Uuid,
    /// Bounded outbound buffer.
    pub tx: mpsc::Sender<Message>,
    /// Signalled when the relay drops the viewer so its socket task can close.
    pub evicted: Arc<Notify>,
}

impl ViewerConnection {
    /// Build a connection backed by a bounded outbound buffer, returning the receiving end the
    /// socket writer drains.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let connection = Self {
            id: Uuid::new_v4(),
            tx,
            evicted: Arc::new(Notify::new()),
        };
        (connection, rx)
    }
}

/// One audience room: a single upstream subscription fanned out to many viewers.
pub struct Room {
    key: String,
    viewers: DashMap<Uuid, ViewerConnection>,
    upstream: RwLock<UpstreamMode>,
    created: Instant,
    last_active_ms: AtomicU64,
}

impl Room {
    /// Create an empty room for `key`; the upstream starts in the connecting state.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            viewers: DashMap::new(),
            upstream: RwLock::new(UpstreamMode::Connecting),
            created: Instant::now(),
            last_active_ms: AtomicU64::new(0),
        }
    }

    /// Normalized room key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of connected viewers.
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Whether `viewer` is still part of the fan-out set.
    pub fn has_viewer(&self, viewer: &Uuid) -> bool {
        self.viewers.contains_key(viewer)
    }

    /// Current upstream mode.
    pub async fn upstream(&self) -> UpstreamMode {
        *self.upstream.read().await
    }

    /// Record a new upstream mode.
    pub async fn set_upstream(&self, mode: UpstreamMode) {
        *self.upstream.write().await = mode;
    }

    /// Record a new upstream mode and announce it before any viewer can join under that mode.
    pub async fn set_upstream_and_broadcast(&self, mode: UpstreamMode, event: &NormalizedEvent) -> usize {
        let mut current = self.upstream.write().await;
        *current = mode;
        self.broadcast(event)
    }

    /// Time elapsed since the last viewer joined or left.
    pub fn idle_for(&self) -> std::time::Duration {
        let last = self.created
            + std::time::Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed));
        Instant::now().saturating_duration_since(last)
    }

    fn touch(&self) {
        let elapsed = Instant::now().saturating_duration_since(self.created);
        self.last_active_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Add a viewer after queueing `greeting` on its own buffer, so the greeting always
    /// precedes relayed traffic.
    pub fn add_viewer(&self, connection: ViewerConnection, greeting: &[NormalizedEvent]) -> bool {
        for event in greeting {
            let Some(payload) = serialize_event(event) else {
                continue;
            };
            if connection.tx.try_send(Message::Text(payload)).is_err() {
                warn!(room = %self.key, viewer = %connection.id, "viewer closed before greeting");
                return false;
            }
        }
        self.viewers.insert(connection.id, connection);
        self.touch();
        true
    }

    /// Add a viewer greeted with `greeting(mode)`, holding the upstream mode steady until the
    /// viewer is part of the fan-out set.
    pub async fn add_viewer_for_mode<F>(&self, connection: ViewerConnection, greeting: F) -> bool
    where
        F: FnOnce(UpstreamMode) -> Vec<NormalizedEvent>,
    {
        let mode = self.upstream.read().await;
        let events = greeting(*mode);
        self.add_viewer(connection, &events)
    }

    /// Remove a viewer. The upstream subscription is left running.
    pub fn remove_viewer(&self, viewer: &Uuid) -> Option<ViewerConnection> {
        let removed = self.viewers.remove(viewer).map(|(_, connection)| connection);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Serialize `event` once and push it to every viewer without waiting on any of them.
    ///
    /// A viewer whose buffer is full or closed is dropped from the room and told to close;
    /// delivery to the others continues. Returns the number of viewers that received it.
    pub fn broadcast(&self, event: &NormalizedEvent) -> usize {
        let Some(payload) = serialize_event(event) else {
            return 0;
        };

        let mut failed = Vec::new();
        let mut delivered = 0;
        for entry in self.viewers.iter() {
            match entry.tx.try_send(Message::Text(payload.clone())) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    debug!(room = %self.key, viewer = %entry.id, error = %err, "viewer send failed");
                    failed.push(*entry.key());
                }
            }
        }

        for viewer in failed {
            if let Some(connection) = self.remove_viewer(&viewer) {
                warn!(room = %self.key, viewer = %viewer, "dropping unresponsive viewer");
                connection.evicted.notify_one();
            }
        }

        delivered
    }
}

fn serialize_event(event: &NormalizedEvent) -> Option<Utf8Bytes> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload.into()),
        Err(err) => {
            warn!(error = %err, kind = event.kind(), "failed to serialize relay event");
            None
        }
    }
}
