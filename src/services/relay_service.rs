use std::{sync::Arc, time::Duration};

use dashmap::mapref::entry::Entry;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        event::NormalizedEvent,
        rooms::{RoomSummary, UpstreamMode},
    },
    services::normalizer::normalize,
    source::{SourceError, SourceEvent, SourceEventKind},
    state::{Room, RoomHandle, SharedState, ViewerConnection},
};

/// Return the room registered under `key`, creating it and starting its upstream pump when it
/// does not exist yet.
///
/// Creation happens under the registry's entry lock, so concurrent callers for the same key
/// observe a single room and a single upstream subscription.
pub fn ensure_room(state: &SharedState, key: &str) -> RoomHandle {
    match state.rooms().entry(key.to_string()) {
        Entry::Occupied(entry) => entry.get().clone(),
        Entry::Vacant(entry) => {
            let room = Arc::new(Room::new(key));
            entry.insert(room.clone());
            info!(room = %key, "created relay room");
            tokio::spawn(run_upstream(state.clone(), room.clone()));
            room
        }
    }
}

/// Add a viewer to the room's fan-out set, greeting it before any live traffic.
pub async fn subscribe(room: &RoomHandle, viewer: ViewerConnection) -> bool {
    let viewer_id = viewer.id;
    let key = room.key();
    let added = room
        .add_viewer_for_mode(viewer, |mode| {
            let mut greeting = vec![NormalizedEvent::room_info(format!(
                "Connected to relay room {key}"
            ))];
            if mode == UpstreamMode::Heartbeat {
                greeting.push(NormalizedEvent::room_info(heartbeat_mode_notice(key)));
            }
            greeting
        })
        .await;
    if added {
        info!(room = %room.key(), viewer = %viewer_id, viewers = room.viewer_count(), "viewer joined");
    }
    added
}

/// Remove a viewer. The upstream subscription stays warm even when no viewer is left.
pub fn unsubscribe(room: &RoomHandle, viewer: &Uuid) {
    if room.remove_viewer(viewer).is_some() {
        info!(room = %room.key(), viewer = %viewer, viewers = room.viewer_count(), "viewer left");
    }
}

/// Fan an event out to every viewer of the room.
pub fn broadcast(room: &RoomHandle, event: &NormalizedEvent) -> usize {
    room.broadcast(event)
}

/// Snapshot every registered room for the `/rooms` listing.
pub async fn list_rooms(state: &SharedState) -> Vec<RoomSummary> {
    let rooms: Vec<RoomHandle> = state
        .rooms()
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    let mut summaries = Vec::with_capacity(rooms.len());
    for room in rooms {
        summaries.push(RoomSummary {
            room: room.key().to_string(),
            viewers: room.viewer_count(),
            upstream: room.upstream().await,
            idle_ms: room.idle_for().as_millis() as u64,
        });
    }
    summaries.sort_by(|a, b| a.room.cmp(&b.room));
    summaries
}

/// Keys of rooms without viewers for longer than `threshold`.
pub fn idle_rooms(state: &SharedState, threshold: Duration) -> Vec<String> {
    state
        .rooms()
        .iter()
        .filter(|entry| entry.viewer_count() == 0 && entry.idle_for() > threshold)
        .map(|entry| entry.key().clone())
        .collect()
}

/// Periodically observe idle rooms.
///
/// Rooms are never evicted: upstream connections are expensive to re-establish, so idle rooms
/// are only reported.
pub async fn run_housekeeping(state: SharedState) {
    let config = state.config();
    let mut ticker = interval(config.relay.housekeeping_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        for key in idle_rooms(&state, config.relay.idle_threshold()) {
            debug!(room = %key, "room idle without viewers; keeping upstream warm");
        }
    }
}

/// Keep one upstream subscription alive for `room`, relaying every event it yields.
///
/// Transient failures are announced to viewers and retried with exponential backoff; an
/// unavailable provider switches the room to heartbeat mode for the rest of the process.
async fn run_upstream(state: SharedState, room: RoomHandle) {
    let config = state.config();
    let initial_delay = config.relay.upstream_retry_initial();
    let max_delay = config.relay.upstream_retry_max();
    let mut delay = initial_delay;
    let key = room.key().to_string();

    loop {
        match state.source().connect(&key).await {
            Ok(mut events) => {
                room.set_upstream(UpstreamMode::Live).await;
                delay = initial_delay;
                let mut announced_disconnect = false;

                while let Some(event) = events.recv().await {
                    announced_disconnect = event.kind == SourceEventKind::Disconnected;
                    if event.kind == SourceEventKind::Connected {
                        room.set_upstream(UpstreamMode::Live).await;
                    }
                    room.broadcast(&relay_event(&key, &event));
                }

                warn!(room = %key, "upstream stream closed; reconnecting");
                room.set_upstream(UpstreamMode::Reconnecting).await;
                if !announced_disconnect {
                    room.broadcast(&NormalizedEvent::room_info(format!("[{key}] disconnected")));
                }
            }
            Err(SourceError::Unavailable(reason)) => {
                warn!(room = %key, reason = %reason, "event source unavailable; entering heartbeat mode");
                run_heartbeat(&room, config.relay.heartbeat_interval()).await;
                return;
            }
            Err(SourceError::Connect(reason)) => {
                warn!(room = %key, error = %reason, "upstream connection attempt failed");
                room.set_upstream(UpstreamMode::Reconnecting).await;
                room.broadcast(&NormalizedEvent::room_info(format!(
                    "[{key}] connect error: {reason}"
                )));
            }
        }

        sleep(delay).await;
        delay = (delay * 2).min(max_delay);
    }
}

/// Announce heartbeat mode immediately, then emit a heartbeat line on every tick.
async fn run_heartbeat(room: &Room, period: Duration) {
    room.set_upstream_and_broadcast(
        UpstreamMode::Heartbeat,
        &NormalizedEvent::room_info(heartbeat_mode_notice(room.key())),
    )
    .await;

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        room.broadcast(&NormalizedEvent::room_info(format!("[{}] heartbeat", room.key())));
    }
}

fn heartbeat_mode_notice(key: &str) -> String {
    format!("[{key}] live events unavailable; relay alive in heartbeat mode")
}

/// Turn a raw upstream event into the event relayed to viewers.
fn relay_event(key: &str, event: &SourceEvent) -> NormalizedEvent {
    match &event.kind {
        SourceEventKind::Connected => NormalizedEvent::room_info(format!("[{key}] connected")),
        SourceEventKind::Disconnected => {
            NormalizedEvent::room_info(format!("[{key}] disconnected"))
        }
        SourceEventKind::StreamEnd => NormalizedEvent::room_info(format!("[{key}] stream ended")),
        SourceEventKind::ConnectError => {
            let detail = event
                .payload
                .get("message")
                .and_then(|value| value.as_str())
                .or_else(|| event.payload.as_str())
                .unwrap_or("unknown error");
            NormalizedEvent::room_info(format!("[{key}] connect error: {detail}"))
        }
        kind => normalize(kind, &event.payload),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use axum::extract::ws::Message;
    use futures::future::BoxFuture;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        config::AppConfig,
        source::{EventSource, SourceResult, UnavailableSource},
        state::AppState,
    };

    #[derive(Default)]
    struct ChannelSource {
        connects: AtomicUsize,
        senders: Mutex<Vec<mpsc::Sender<SourceEvent>>>,
    }

    impl EventSource for ChannelSource {
        fn connect(&self, _room: &str) -> BoxFuture<'static, SourceResult<mpsc::Receiver<SourceEvent>>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            Box::pin(async move { Ok(rx) })
        }
    }

    /// Fails with the scripted connect errors first, then hands out live channels.
    #[derive(Default)]
    struct FlakySource {
        connects: AtomicUsize,
        failures: Mutex<VecDeque<&'static str>>,
        senders: Mutex<Vec<mpsc::Sender<SourceEvent>>>,
    }

    impl FlakySource {
        fn failing(reasons: &[&'static str]) -> Self {
            Self {
                failures: Mutex::new(reasons.iter().copied().collect()),
                ..Self::default()
            }
        }
    }

    impl EventSource for FlakySource {
        fn connect(&self, _room: &str) -> BoxFuture<'static, SourceResult<mpsc::Receiver<SourceEvent>>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if let Some(reason) = self.failures.lock().unwrap().pop_front() {
                return Box::pin(async move { Err(SourceError::Connect(reason.to_string())) });
            }
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            Box::pin(async move { Ok(rx) })
        }
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    fn text_of(message: Message) -> String {
        match message {
            Message::Text(text) => text.to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn info_text(message: Message) -> String {
        match serde_json::from_str::<NormalizedEvent>(&text_of(message)).unwrap() {
            NormalizedEvent::RoomInfo(info) => info.text,
            other => panic!("expected room info, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ensure_room_is_single_flight() {
        let source = Arc::new(ChannelSource::default());
        let state = AppState::new(Arc::new(AppConfig::default()), source.clone());

        let first = ensure_room(&state, "nova");
        let second = ensure_room(&state, "nova");
        tokio::task::yield_now().await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(state.rooms().len(), 1);
        assert_eq!(source.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_callers_share_one_room_and_one_upstream() {
        let source = Arc::new(ChannelSource::default());
        let state = AppState::new(Arc::new(AppConfig::default()), source.clone());
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let state = state.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    ensure_room(&state, "nova")
                })
            })
            .collect();
        let rooms: Vec<RoomHandle> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|room| room.unwrap())
            .collect();

        assert!(rooms.iter().all(|room| Arc::ptr_eq(room, &rooms[0])));
        assert_eq!(state.rooms().len(), 1);
        tokio::time::timeout(Duration::from_secs(1), async {
            while source.connects.load(Ordering::SeqCst) == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(source.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn viewer_receives_confirmation_then_normalized_events() {
        let source = Arc::new(ChannelSource::default());
        let state = AppState::new(Arc::new(AppConfig::default()), source.clone());
        let room = ensure_room(&state, "nova");
        tokio::task::yield_now().await;

        let (viewer, mut rx) = ViewerConnection::new(16);
        assert!(subscribe(&room, viewer).await);
        assert!(text_of(rx.recv().await.unwrap()).contains("Connected to relay room nova"));

        let upstream = source.senders.lock().unwrap()[0].clone();
        upstream
            .send(SourceEvent::new("chat", json!({ "uniqueId": "kai", "comment": "!a" })))
            .await
            .unwrap();
        upstream
            .send(SourceEvent::new("streamEnd", json!({})))
            .await
            .unwrap();

        let chat: NormalizedEvent = serde_json::from_str(&text_of(rx.recv().await.unwrap())).unwrap();
        assert_eq!(chat.user().unwrap().username, "@kai");
        assert!(text_of(rx.recv().await.unwrap()).contains("[nova] stream ended"));
    }

    #[tokio::test]
    async fn unsubscribing_last_viewer_keeps_room_and_upstream() {
        let source = Arc::new(ChannelSource::default());
        let state = AppState::new(Arc::new(AppConfig::default()), source.clone());
        let room = ensure_room(&state, "nova");
        let (viewer, _rx) = ViewerConnection::new(4);
        let viewer_id = viewer.id;
        subscribe(&room, viewer).await;

        unsubscribe(&room, &viewer_id);
        tokio::task::yield_now().await;

        assert_eq!(room.viewer_count(), 0);
        assert!(state.room("nova").is_some());
        assert_eq!(source.connects.load(Ordering::SeqCst), 1);
        assert!(!source.senders.lock().unwrap()[0].is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_source_degrades_to_heartbeats() {
        let mut config = AppConfig::default();
        config.relay.heartbeat_interval_ms = 1_000;
        let state = AppState::new(Arc::new(config), Arc::new(UnavailableSource));
        let room = ensure_room(&state, "quiet");
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(room.upstream().await, UpstreamMode::Heartbeat);

        let (viewer, mut rx) = ViewerConnection::new(16);
        subscribe(&room, viewer).await;
        assert!(text_of(rx.recv().await.unwrap()).contains("Connected to relay room quiet"));
        assert!(text_of(rx.recv().await.unwrap()).contains("heartbeat mode"));

        tokio::time::advance(Duration::from_millis(1_100)).await;
        assert!(text_of(rx.recv().await.unwrap()).contains("[quiet] heartbeat"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_heartbeat_interval_keeps_heartbeating() {
        let mut config = AppConfig::default();
        config.relay.heartbeat_interval_ms = 0;
        let state = AppState::new(Arc::new(config), Arc::new(UnavailableSource));
        let room = ensure_room(&state, "quiet");
        settle().await;

        let (viewer, mut rx) = ViewerConnection::new(64);
        subscribe(&room, viewer).await;
        assert!(text_of(rx.recv().await.unwrap()).contains("Connected to relay room quiet"));
        assert!(text_of(rx.recv().await.unwrap()).contains("heartbeat mode"));

        tokio::time::advance(Duration::from_millis(5)).await;
        assert!(text_of(rx.recv().await.unwrap()).contains("[quiet] heartbeat"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn viewers_joining_during_the_switch_hear_heartbeat_mode_once() {
        let state = AppState::new(Arc::new(AppConfig::default()), Arc::new(UnavailableSource));
        let room = ensure_room(&state, "quiet");

        let joins: Vec<_> = (0..16)
            .map(|_| {
                let room = room.clone();
                tokio::spawn(async move {
                    let (viewer, rx) = ViewerConnection::new(16);
                    subscribe(&room, viewer).await;
                    rx
                })
            })
            .collect();
        let receivers: Vec<_> = futures::future::join_all(joins)
            .await
            .into_iter()
            .map(|rx| rx.unwrap())
            .collect();

        // The mode flips and the announcement goes out under the same lock.
        tokio::time::timeout(Duration::from_secs(1), async {
            while room.upstream().await != UpstreamMode::Heartbeat {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        for mut rx in receivers {
            let mut notices = 0;
            while let Ok(message) = rx.try_recv() {
                if text_of(message).contains("heartbeat mode") {
                    notices += 1;
                }
            }
            assert_eq!(notices, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_announced_and_retried_with_backoff() {
        let source = Arc::new(FlakySource::failing(&["refused", "timed out"]));
        let state = AppState::new(Arc::new(AppConfig::default()), source.clone());
        let room = ensure_room(&state, "flaky");
        let (viewer, mut rx) = ViewerConnection::new(16);
        subscribe(&room, viewer).await;
        assert!(text_of(rx.recv().await.unwrap()).contains("Connected to relay room flaky"));

        assert_eq!(info_text(rx.recv().await.unwrap()), "[flaky] connect error: refused");
        assert_eq!(source.connects.load(Ordering::SeqCst), 1);
        assert_eq!(room.upstream().await, UpstreamMode::Reconnecting);

        // First retry after the initial delay.
        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(source.connects.load(Ordering::SeqCst), 1);
        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(source.connects.load(Ordering::SeqCst), 2);
        assert_eq!(info_text(rx.recv().await.unwrap()), "[flaky] connect error: timed out");

        // Second retry waits twice as long.
        tokio::time::advance(Duration::from_millis(1_999)).await;
        settle().await;
        assert_eq!(source.connects.load(Ordering::SeqCst), 2);
        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(source.connects.load(Ordering::SeqCst), 3);
        assert_eq!(room.upstream().await, UpstreamMode::Live);

        // A closed stream is announced and reconnected after the reset delay.
        source.senders.lock().unwrap().clear();
        assert_eq!(info_text(rx.recv().await.unwrap()), "[flaky] disconnected");
        assert_eq!(room.upstream().await, UpstreamMode::Reconnecting);
        tokio::time::advance(Duration::from_millis(1_000)).await;
        settle().await;
        assert_eq!(source.connects.load(Ordering::SeqCst), 4);
        assert_eq!(room.upstream().await, UpstreamMode::Live);
    }

    #[test]
    fn lifecycle_events_become_room_info() {
        let error = SourceEvent::new("connectError", json!({ "message": "offline" }));
        match relay_event("nova", &error) {
            NormalizedEvent::RoomInfo(info) => assert_eq!(info.text, "[nova] connect error: offline"),
            other => panic!("expected room info, got {other:?}"),
        }
        match relay_event("nova", &SourceEvent::new("connected", json!(null))) {
            NormalizedEvent::RoomInfo(info) => assert_eq!(info.text, "[nova] connected"),
            other => panic!("expected room info, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_rooms_are_reported_but_kept() {
        let state = AppState::new(
            Arc::new(AppConfig::default()),
            Arc::new(ChannelSource::default()),
        );
        ensure_room(&state, "idle");
        tokio::time::advance(Duration::from_secs(11 * 60)).await;

        assert_eq!(idle_rooms(&state, Duration::from_secs(600)), vec!["idle".to_string()]);
        assert!(state.room("idle").is_some());
    }
}
