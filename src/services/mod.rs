/// OpenAPI documentation generation.
pub mod documentation;
/// Liveness check.
pub mod health_service;
/// Raw provider payload normalization.
pub mod normalizer;
/// Room registry, upstream pumps and fan-out.
pub mod relay_service;
/// Viewer WebSocket connection handling.
pub mod websocket_service;
