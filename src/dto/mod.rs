use time::OffsetDateTime;

/// Battle snapshot published by the host.
pub mod battle;
/// Normalized audience events.
pub mod event;
/// Health check payload.
pub mod health;
/// Room listing payloads.
pub mod rooms;
/// Input validation helpers.
pub mod validation;
/// Viewer socket query and control messages.
pub mod ws;

/// Current wall-clock time as epoch milliseconds, the timestamp format used on the wire.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
