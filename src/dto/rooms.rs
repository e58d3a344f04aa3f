use serde::Serialize;
use utoipa::ToSchema;

/// How a room currently receives upstream audience events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamMode {
    /// Upstream subscription is being established.
    Connecting,
    /// Upstream subscription is live.
    Live,
    /// Upstream dropped or failed; reconnecting with backoff.
    Reconnecting,
    /// No upstream available; only heartbeats are relayed.
    Heartbeat,
}

/// Public view of one relay room.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSummary {
    /// Normalized room key.
    pub room: String,
    /// Connected viewers.
    pub viewers: usize,
    /// Upstream state.
    pub upstream: UpstreamMode,
    /// Milliseconds since the last viewer joined or left.
    pub idle_ms: u64,
}
