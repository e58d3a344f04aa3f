//! Viewer-side battle core: chat routing, the admission queue, versioned timers and the stage
//! machine, plus the async engine and relay transport that drive them.

/// Viewer transport to the relay with reconnect and simulated fallback.
pub mod client;
/// Async actor owning the state machine and executing its effects.
pub mod engine;
/// Gift-driven hype meter.
pub mod hype;
/// Playback Sink and catalog seams.
pub mod playback;
/// Deduplicating, rate-limited track queue.
pub mod queue;
/// Chat classification into votes, queue commands and gifts.
pub mod router;
/// Stage cycle, votes and transitions.
pub mod state_machine;
/// Version-tagged single-shot timers.
pub mod timer;
