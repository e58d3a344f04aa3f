//! Application-level configuration loading for the relay server and the battle host.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::battle::playback::Track;

/// Default location on disk where both binaries look for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SONG_BATTLE_CONFIG_PATH";
/// Environment variable that overrides [`RelayConfig::default_room`].
const DEFAULT_ROOM_ENV: &str = "RELAY_DEFAULT_ROOM";
/// Environment variable that overrides [`ClientConfig::relay_url`].
const RELAY_URL_ENV: &str = "RELAY_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Relay server settings.
    pub relay: RelayConfig,
    /// Battle timings and thresholds.
    pub battle: BattleConfig,
    /// Battle host transport settings.
    pub client: ClientConfig,
    /// Tracks served by the built-in static catalog of the battle host.
    pub catalog: Vec<Track>,
}

/// Which Event Source feeds relay rooms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// No provider: rooms run in heartbeat mode.
    #[default]
    None,
    /// Built-in generator of fake audience traffic.
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Relay server settings.
pub struct RelayConfig {
    /// Room used when a viewer names none.
    pub default_room: String,
    /// Event Source feeding relay rooms.
    pub source: SourceKind,
    /// Messages buffered per viewer before it counts as too slow and is dropped.
    pub viewer_buffer: usize,
    /// Period of heartbeat lines in heartbeat mode.
    pub heartbeat_interval_ms: u64,
    /// Period of the idle-room sweep.
    pub housekeeping_interval_ms: u64,
    /// Time without viewers after which a room counts as idle.
    pub idle_threshold_ms: u64,
    /// First upstream retry delay.
    pub upstream_retry_initial_ms: u64,
    /// Upper bound of the upstream retry delay.
    pub upstream_retry_max_ms: u64,
    /// Period of simulated audience events.
    pub simulation_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_room: "lobby".into(),
            source: SourceKind::None,
            viewer_buffer: 256,
            heartbeat_interval_ms: 15_000,
            housekeeping_interval_ms: 60_000,
            idle_threshold_ms: 10 * 60 * 1000,
            upstream_retry_initial_ms: 1_000,
            upstream_retry_max_ms: 10_000,
            simulation_interval_ms: 1_000,
        }
    }
}

impl RelayConfig {
    /// Heartbeat period, never zero.
    pub fn heartbeat_interval(&self) -> Duration {
        period(self.heartbeat_interval_ms)
    }

    /// Idle-room sweep period, never zero.
    pub fn housekeeping_interval(&self) -> Duration {
        period(self.housekeeping_interval_ms)
    }

    /// Simulated event period, never zero.
    pub fn simulation_interval(&self) -> Duration {
        period(self.simulation_interval_ms)
    }

    /// Idle threshold.
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }

    /// First upstream retry delay.
    pub fn upstream_retry_initial(&self) -> Duration {
        Duration::from_millis(self.upstream_retry_initial_ms)
    }

    /// Upstream retry ceiling.
    pub fn upstream_retry_max(&self) -> Duration {
        Duration::from_millis(self.upstream_retry_max_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Timings and thresholds of the battle state machine, queue and hype meter.
pub struct BattleConfig {
    /// Length of each play stage.
    pub play_ms: u64,
    /// Length of each voting window.
    pub vote_ms: u64,
    /// Length of the victory lap.
    pub victory_ms: u64,
    /// Delay between intro checks while the queue is short.
    pub intro_retry_ms: u64,
    /// Pause between the final vote and the winner announcement.
    pub winner_delay_ms: u64,
    /// Pause between finishing and the next intro check.
    pub settle_ms: u64,
    /// Tracks shorter than this resume near their start during the victory lap.
    pub victory_short_track_ms: u64,
    /// Victory resume position for short tracks.
    pub victory_short_offset_ms: u64,
    /// Victory resume position for regular tracks.
    pub victory_offset_ms: u64,
    /// Smallest hype gain per gift.
    pub hype_min_gain: u8,
    /// Largest hype gain per gift.
    pub hype_max_gain: u8,
    /// Hype lost per decay step.
    pub hype_decay: u8,
    /// Delay before a gift's hype decays.
    pub hype_decay_delay_ms: u64,
    /// Gift value at or above which the sender's queued track jumps to the front.
    pub boost_threshold: u64,
    /// Minimum time between two requests of one viewer.
    pub requester_cooldown_ms: u64,
    /// Time during which a just-added track cannot be added again.
    pub recent_add_window_ms: u64,
    /// Upper bound of one sink or catalog call.
    pub sink_timeout_ms: u64,
    /// Catalog query used to seed demo pairs.
    pub demo_seed_query: String,
    /// Number of demo tracks seeded.
    pub demo_seed_count: usize,
    /// Start sequencing as soon as the host is up.
    pub auto_start: bool,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            play_ms: 20_000,
            vote_ms: 15_000,
            victory_ms: 20_000,
            intro_retry_ms: 2_000,
            winner_delay_ms: 1_000,
            settle_ms: 500,
            victory_short_track_ms: 40_000,
            victory_short_offset_ms: 5_000,
            victory_offset_ms: 40_000,
            hype_min_gain: 1,
            hype_max_gain: 20,
            hype_decay: 5,
            hype_decay_delay_ms: 3_000,
            boost_threshold: 10,
            requester_cooldown_ms: 5_000,
            recent_add_window_ms: 8_000,
            sink_timeout_ms: 5_000,
            demo_seed_query: "genre:bass OR genre:party".into(),
            demo_seed_count: 4,
            auto_start: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Viewer-side transport settings used by the battle host.
pub struct ClientConfig {
    /// Relay WebSocket endpoint.
    pub relay_url: String,
    /// Room to join; the relay default room is used when absent.
    pub room: Option<String>,
    /// First reconnect delay.
    pub reconnect_initial_ms: u64,
    /// Upper bound of the reconnect delay.
    pub reconnect_max_ms: u64,
    /// Consecutive failed connection attempts before switching to the local simulated feed.
    pub max_consecutive_failures: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:10000/ws".into(),
            room: None,
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 10_000,
            max_consecutive_failures: 5,
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults, then
    /// apply environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        catalog = config.catalog.len(),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(room) = non_empty_env(DEFAULT_ROOM_ENV) {
            self.relay.default_room = room;
        }
        if let Some(url) = non_empty_env(RELAY_URL_ENV) {
            self.client.relay_url = url;
        }
    }

    /// Room the battle host joins.
    pub fn client_room(&self) -> &str {
        self.client
            .room
            .as_deref()
            .filter(|room| !room.is_empty())
            .unwrap_or(&self.relay.default_room)
    }
}

/// Ticker periods must be non-zero; a configured `0` runs at the shortest period instead.
fn period(millis: u64) -> Duration {
    Duration::from_millis(millis.max(1))
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "relay": { "source": "simulated" }, "battle": { "play_ms": 1000 } }"#,
        )
        .unwrap();

        assert_eq!(config.relay.source, SourceKind::Simulated);
        assert_eq!(config.relay.default_room, "lobby");
        assert_eq!(config.battle.play_ms, 1000);
        assert_eq!(config.battle.vote_ms, 15_000);
        assert_eq!(config.client.max_consecutive_failures, 5);
        assert!(config.catalog.is_empty());
    }

    #[test]
    fn zero_periods_are_raised_to_one_millisecond() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "relay": { "heartbeat_interval_ms": 0, "housekeeping_interval_ms": 0, "simulation_interval_ms": 0 } }"#,
        )
        .unwrap();

        assert_eq!(config.relay.heartbeat_interval(), Duration::from_millis(1));
        assert_eq!(config.relay.housekeeping_interval(), Duration::from_millis(1));
        assert_eq!(config.relay.simulation_interval(), Duration::from_millis(1));
        assert_eq!(
            AppConfig::default().relay.heartbeat_interval(),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn client_room_falls_back_to_relay_default() {
        let mut config = AppConfig::default();
        assert_eq!(config.client_room(), "lobby");
        config.client.room = Some("nova".into());
        assert_eq!(config.client_room(), "nova");
    }
}
