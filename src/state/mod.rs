/// Relay rooms and viewer connections.
pub mod room;

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    config::AppConfig,
    source::EventSource,
};

pub use self::room::{Room, RoomHandle, ViewerConnection};

/// Reference-counted handle to [`AppState`].
pub type SharedState = Arc<AppState>;

/// Central relay state: the room registry, the upstream provider and the configuration.
///
/// Rooms are created lazily on first reference and live for the whole process.
pub struct AppState {
    config: Arc<AppConfig>,
    source: Arc<dyn EventSource>,
    rooms: DashMap<String, RoomHandle>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: Arc<AppConfig>, source: Arc<dyn EventSource>) -> SharedState {
        Arc::new(Self {
            config,
            source,
            rooms: DashMap::new(),
        })
    }

    /// Shared configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Provider used to open upstream subscriptions.
    pub fn source(&self) -> Arc<dyn EventSource> {
        self.source.clone()
    }

    /// Registry of rooms keyed by their normalized key.
    pub fn rooms(&self) -> &DashMap<String, RoomHandle> {
        &self.rooms
    }

    /// Look up an existing room without creating it.
    pub fn room(&self, key: &str) -> Option<RoomHandle> {
        self.rooms.get(key).map(|entry| entry.value().clone())
    }
}
