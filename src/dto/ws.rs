use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::dto::validation::validate_room_key;

/// Query string accepted by the relay WebSocket endpoint.
#[derive(Debug, Default, Deserialize, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct RelayQuery {
    /// Room key to join; a leading `@` is stripped and the default room is used when absent.
    #[validate(custom(function = "validate_room_key"))]
    pub room: Option<String>,
}

/// Messages a viewer may send back to the relay.
///
/// Control messages are reserved for future use; the relay parses and ignores them.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum ViewerControlMessage {
    /// Keep-alive from the viewer.
    #[serde(rename = "ping")]
    Ping,
    /// Any other message type.
    #[serde(other)]
    Unknown,
}
