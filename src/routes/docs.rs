use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// Path of the raw OpenAPI document served next to the UI.
const OPENAPI_JSON: &str = "/api-doc/openapi.json";

/// Swagger UI at `/docs` over the relay's OpenAPI document.
pub fn router() -> Router<SharedState> {
    SwaggerUi::new("/docs")
        .url(OPENAPI_JSON, ApiDoc::openapi())
        .into()
}
