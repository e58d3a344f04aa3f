use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::dto::now_millis;

/// Audience event relayed to viewers, one JSON object per WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedEvent {
    /// Chat line typed by a viewer of the live stream.
    Chat(ChatEvent),
    /// Monetary gift sent during the stream.
    Gift(GiftEvent),
    /// Like burst.
    Like(UserEvent),
    /// Viewer subscribed to the streamer.
    Subscribed(UserEvent),
    /// Synthetic status line (connection changes, errors, heartbeats, notices).
    RoomInfo(RoomInfoEvent),
}

/// Identity of the audience member behind an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventUser {
    /// Stable identifier from the provider.
    #[serde(default)]
    pub user_id: String,
    /// `@`-prefixed handle.
    #[serde(default)]
    pub username: String,
    /// Name shown in chat.
    #[serde(default)]
    pub display_name: String,
    /// Profile picture URL.
    #[serde(default)]
    pub avatar_url: String,
}

/// Payload of a chat event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Author.
    #[serde(flatten)]
    pub user: EventUser,
    /// Message body.
    #[serde(default)]
    pub text: String,
    /// Epoch milliseconds.
    pub ts: i64,
}

/// Payload of a gift event. `value` is always at least 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftEvent {
    /// Sender.
    #[serde(flatten)]
    pub user: EventUser,
    /// Gift worth, at least 1.
    #[serde(default = "default_gift_value", deserialize_with = "gift_value")]
    pub value: u64,
    /// Provider name of the gift.
    #[serde(default, rename = "giftName")]
    pub gift_name: String,
    /// Epoch milliseconds.
    pub ts: i64,
}

/// Payload shared by like and subscribe events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    /// Audience member.
    #[serde(flatten)]
    pub user: EventUser,
    /// Epoch milliseconds.
    pub ts: i64,
}

/// Payload of a synthetic room info line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfoEvent {
    /// Status line.
    pub text: String,
    /// Epoch milliseconds.
    pub ts: i64,
}

fn default_gift_value() -> u64 {
    1
}

/// Accept any JSON for a gift value: positive integers, numeric strings and floats of at least
/// 1 (floored) are kept, everything else counts as 1.
fn gift_value<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v >= 1.0).map(|v| v as u64)),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    Ok(value.filter(|value| *value >= 1).unwrap_or_else(default_gift_value))
}

impl EventUser {
    /// Identifier used for vote and rate-limit bookkeeping: the user id, or the username when
    /// the source did not provide one.
    pub fn voter_key(&self) -> &str {
        if self.user_id.is_empty() {
            &self.username
        } else {
            &self.user_id
        }
    }
}

impl NormalizedEvent {
    /// Build a status line stamped with the current time.
    pub fn room_info(text: impl Into<String>) -> Self {
        Self::RoomInfo(RoomInfoEvent {
            text: text.into(),
            ts: now_millis(),
        })
    }

    /// Audience member behind the event, absent for synthetic room info.
    pub fn user(&self) -> Option<&EventUser> {
        match self {
            Self::Chat(ChatEvent { user, .. })
            | Self::Gift(GiftEvent { user, .. })
            | Self::Like(UserEvent { user, .. })
            | Self::Subscribed(UserEvent { user, .. }) => Some(user),
            Self::RoomInfo(_) => None,
        }
    }

    /// Normalization timestamp in epoch milliseconds.
    pub fn ts(&self) -> i64 {
        match self {
            Self::Chat(event) => event.ts,
            Self::Gift(event) => event.ts,
            Self::Like(event) | Self::Subscribed(event) => event.ts,
            Self::RoomInfo(event) => event.ts,
        }
    }

    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::Gift(_) => "gift",
            Self::Like(_) => "like",
            Self::Subscribed(_) => "subscribed",
            Self::RoomInfo(_) => "room_info",
        }
    }
}
