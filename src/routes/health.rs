use axum::{Json, Router, routing::get};

use crate::{dto::health::HealthResponse, services::health_service, state::SharedState};

const BANNER: &str = "Song battle relay
- WS endpoint: /ws?room=<room-key>
- Rooms: /rooms
- Health: /healthz
";

#[utoipa::path(
    get,
    path = "/healthz",
    tag = "health",
    responses((status = 200, description = "Process is alive", body = HealthResponse))
)]
/// Return the liveness status of the relay.
pub async fn healthz() -> Json<HealthResponse> {
    Json(health_service::health_status())
}

/// Plain-text usage banner served at the root.
pub async fn banner() -> &'static str {
    BANNER
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/", get(banner))
        .route("/healthz", get(healthz))
}
