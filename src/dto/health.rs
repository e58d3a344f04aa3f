use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::now_millis;

/// Liveness payload returned by the `/healthz` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status, always "ok" while the process serves requests.
    pub status: String,
    /// Server time in epoch milliseconds.
    pub ts: i64,
}

impl HealthResponse {
    /// Create a health response indicating the process is alive.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            ts: now_millis(),
        }
    }
}
