use axum::Router;

use crate::state::SharedState;

/// Swagger UI.
pub mod docs;
/// Health and banner routes.
pub mod health;
/// Room listing.
pub mod rooms;
/// Viewer WebSocket endpoint.
pub mod websocket;

/// Compose the relay's route trees and attach the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(rooms::router())
        .merge(websocket::router())
        .merge(docs::router())
        .with_state(state)
}
