use crate::dto::health::HealthResponse;

/// Liveness only: the relay has no hard dependency whose loss makes it unhealthy.
pub fn health_status() -> HealthResponse {
    HealthResponse::ok()
}
