use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use validator::Validate;

use crate::{
    dto::{validation::normalize_room_key, ws::RelayQuery},
    error::AppError,
    services::{relay_service, websocket_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/ws",
    tag = "relay",
    params(RelayQuery),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 400, description = "Invalid room key")
    )
)]
/// Upgrade the HTTP connection into a viewer WebSocket attached to a relay room.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(query): Query<RelayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    query.validate()?;

    let config = state.config();
    let key = normalize_room_key(query.room.as_deref(), &config.relay.default_room);
    let room = relay_service::ensure_room(&state, &key);
    let buffer = config.relay.viewer_buffer;

    Ok(ws.on_upgrade(move |socket| websocket_service::handle_socket(room, socket, buffer)))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
