use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::rooms::RoomSummary, services::relay_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/rooms",
    tag = "relay",
    responses((status = 200, description = "Registered relay rooms", body = Vec<RoomSummary>))
)]
/// List every relay room with its viewer count and upstream mode.
pub async fn list_rooms(State(state): State<SharedState>) -> Json<Vec<RoomSummary>> {
    Json(relay_service::list_rooms(&state).await)
}

/// Configure the room listing routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/rooms", get(list_rooms))
}
