//! Seam towards the live-chat provider that feeds a relay room.

mod simulated;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use self::simulated::{SimulatedSource, simulated_payload};

/// Raw event kinds an Event Source can deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEventKind {
    /// Chat line.
    Chat,
    /// Gift.
    Gift,
    /// Like burst.
    Like,
    /// Subscription.
    Subscribe,
    /// Live stream ended.
    StreamEnd,
    /// Provider connection established.
    Connected,
    /// Provider connection lost.
    Disconnected,
    /// Provider connection attempt failed.
    ConnectError,
    /// Anything the provider sends that this relay does not know about.
    Other(String),
}

impl From<&str> for SourceEventKind {
    fn from(value: &str) -> Self {
        match value {
            "chat" => Self::Chat,
            "gift" => Self::Gift,
            "like" => Self::Like,
            "subscribe" | "subscribed" => Self::Subscribe,
            "streamEnd" => Self::StreamEnd,
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            "connectError" => Self::ConnectError,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One raw provider payload tagged with its kind.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    /// Provider event kind.
    pub kind: SourceEventKind,
    /// Raw provider payload.
    pub payload: Value,
}

impl SourceEvent {
    /// Build an event from a provider kind name and its payload.
    pub fn new(kind: impl AsRef<str>, payload: Value) -> Self {
        Self {
            kind: SourceEventKind::from(kind.as_ref()),
            payload,
        }
    }
}

/// Result alias for upstream operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised while opening an upstream subscription.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The provider integration cannot be used at all; the room falls back to heartbeats.
    #[error("event source unavailable: {0}")]
    Unavailable(String),
    /// Transient failure; the relay retries with backoff.
    #[error("{0}")]
    Connect(String),
}

/// Abstraction over the live-chat provider delivering raw audience events for one room.
///
/// The returned receiver yields events in provider order and closes when the upstream stream
/// ends.
pub trait EventSource: Send + Sync {
    /// Open a subscription for `room`; the stream ends when the provider connection drops.
    fn connect(&self, room: &str) -> BoxFuture<'static, SourceResult<mpsc::Receiver<SourceEvent>>>;
}

/// Source used when no provider integration is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSource;

impl EventSource for UnavailableSource {
    fn connect(&self, _room: &str) -> BoxFuture<'static, SourceResult<mpsc::Receiver<SourceEvent>>> {
        Box::pin(async {
            Err(SourceError::Unavailable(
                "no live-chat provider configured".into(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parsing_accepts_provider_names() {
        assert_eq!(SourceEventKind::from("subscribe"), SourceEventKind::Subscribe);
        assert_eq!(SourceEventKind::from("streamEnd"), SourceEventKind::StreamEnd);
        assert_eq!(
            SourceEventKind::from("roomUser"),
            SourceEventKind::Other("roomUser".into())
        );
    }

    #[tokio::test]
    async fn unavailable_source_never_connects() {
        let err = UnavailableSource.connect("lobby").await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }
}
