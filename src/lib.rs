//! Library crate for song-battle, exposing the relay server and battle host modules to the
//! binaries and integration tests.

pub mod battle;
pub mod config;
/// Wire types shared by routes, services and the battle host.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP and WebSocket routes of the relay.
pub mod routes;
/// Relay services and OpenAPI documentation.
pub mod services;
pub mod source;
/// Shared relay state and rooms.
pub mod state;
