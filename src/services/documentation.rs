use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the song battle relay.
#[openapi(
    paths(
        crate::routes::health::healthz,
        crate::routes::rooms::list_rooms,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::rooms::RoomSummary,
            crate::dto::rooms::UpstreamMode,
            crate::dto::ws::ViewerControlMessage,
        )
    ),
    tags(
        (name = "health", description = "Liveness endpoints"),
        (name = "relay", description = "Audience event relay rooms"),
    )
)]
/// OpenAPI document of the relay.
pub struct ApiDoc;
