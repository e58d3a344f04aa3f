use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval, sleep},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::ClientConfig,
    dto::event::NormalizedEvent,
    services::normalizer::normalize,
    source::{SourceEventKind, simulated_payload},
};

/// Relative spread applied to every reconnect delay.
const JITTER: f64 = 0.1;
/// Shortest period of the local simulated feed.
const MIN_SIMULATION_INTERVAL: Duration = Duration::from_millis(1);

/// Errors raised while preparing the relay connection.
#[derive(Debug, Error)]
pub enum RelayClientError {
    /// Relay URL could not be parsed.
    #[error("invalid relay url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Relay URL is not `ws://` or `wss://`.
    #[error("unsupported relay url scheme: {0}")]
    UnsupportedScheme(String),
}

/// Build the viewer URL, adding `room` unless the configured URL already names one.
pub fn relay_url(base: &str, room: &str) -> Result<Url, RelayClientError> {
    let mut url = Url::parse(base)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(RelayClientError::UnsupportedScheme(url.scheme().to_owned()));
    }
    if !url.query_pairs().any(|(key, _)| key == "room") {
        url.query_pairs_mut().append_pair("room", room);
    }
    Ok(url)
}

/// Delay before the next attempt after `failures` consecutive failures: doubling from
/// `initial`, capped at `max`, then scaled by `1 + jitter` with `jitter` clamped to ±10%.
pub fn reconnect_delay(failures: u32, initial: Duration, max: Duration, jitter: f64) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let base = initial.saturating_mul(1 << exponent).min(max);
    base.mul_f64(1.0 + jitter.clamp(-JITTER, JITTER))
}

/// Viewer-side connection to a relay room.
///
/// Reconnects with exponential backoff and, after too many consecutive failures, switches to a
/// locally generated feed for good so the battle never stalls.
#[derive(Debug, Clone)]
pub struct RelayClient {
    url: Url,
    config: ClientConfig,
    simulation_interval: Duration,
}

impl RelayClient {
    /// Prepare a client for `room` on the configured relay.
    pub fn new(
        config: &ClientConfig,
        room: &str,
        simulation_interval: Duration,
    ) -> Result<Self, RelayClientError> {
        Ok(Self {
            url: relay_url(&config.relay_url, room)?,
            config: config.clone(),
            simulation_interval: simulation_interval.max(MIN_SIMULATION_INTERVAL),
        })
    }

    /// Full viewer URL, room parameter included.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Forward relayed events to `events` until its receiver is dropped.
    pub async fn run(self, events: mpsc::Sender<NormalizedEvent>) {
        let mut failures: u32 = 0;
        loop {
            info!(url = %self.url, "connecting to relay");
            match connect_async(self.url.as_str()).await {
                Ok((mut ws, _)) => {
                    failures = 0;
                    let connected = format!("[relay connected {}]", self.url);
                    if !emit(&events, NormalizedEvent::room_info(connected)).await {
                        return;
                    }

                    loop {
                        match ws.next().await {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<NormalizedEvent>(text.as_str()) {
                                    Ok(event) => {
                                        if !emit(&events, event).await {
                                            return;
                                        }
                                    }
                                    Err(err) => debug!(error = %err, "ignoring unparseable relay frame"),
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!(?frame, "relay closed the connection");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(error = %err, "relay websocket error");
                                break;
                            }
                            None => break,
                        }
                    }

                    if !emit(&events, NormalizedEvent::room_info("[relay disconnected]")).await {
                        return;
                    }
                }
                Err(err) => {
                    failures += 1;
                    warn!(url = %self.url, attempt = failures, error = %err, "relay connect failed");
                    if failures >= self.config.max_consecutive_failures {
                        warn!(failures, "relay unreachable; switching to simulated feed");
                        self.run_simulation(events).await;
                        return;
                    }
                }
            }

            let jitter = rand::rng().random_range(-JITTER..=JITTER);
            let delay = reconnect_delay(
                failures.max(1),
                Duration::from_millis(self.config.reconnect_initial_ms),
                Duration::from_millis(self.config.reconnect_max_ms),
                jitter,
            );
            debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            sleep(delay).await;
        }
    }

    async fn run_simulation(&self, events: mpsc::Sender<NormalizedEvent>) {
        if !emit(&events, NormalizedEvent::room_info("[simulation mode active]")).await {
            return;
        }
        let mut ticker = interval(self.simulation_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (kind, payload) = simulated_payload(&mut rand::rng());
            let event = normalize(&SourceEventKind::from(kind), &payload);
            if !emit(&events, event).await {
                return;
            }
        }
    }
}

async fn emit(events: &mpsc::Sender<NormalizedEvent>, event: NormalizedEvent) -> bool {
    events.send(event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn room_is_appended_once() {
        let url = relay_url("ws://127.0.0.1:10000/ws", "nova").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:10000/ws?room=nova");

        let url = relay_url("ws://relay.local/ws?room=kai", "nova").unwrap();
        assert_eq!(url.as_str(), "ws://relay.local/ws?room=kai");
    }

    #[test]
    fn non_websocket_urls_are_rejected() {
        assert!(matches!(
            relay_url("http://relay.local/ws", "lobby"),
            Err(RelayClientError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            relay_url("not a url", "lobby"),
            Err(RelayClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn delay_doubles_up_to_the_ceiling() {
        let delays: Vec<_> = (1..=6)
            .map(|failures| reconnect_delay(failures, ms(1_000), ms(10_000), 0.0))
            .collect();
        assert_eq!(
            delays,
            vec![ms(1_000), ms(2_000), ms(4_000), ms(8_000), ms(10_000), ms(10_000)]
        );
        assert_eq!(reconnect_delay(u32::MAX, ms(1_000), ms(10_000), 0.0), ms(10_000));
    }

    #[test]
    fn jitter_is_bounded() {
        assert_eq!(reconnect_delay(1, ms(1_000), ms(10_000), 0.5), ms(1_100));
        assert_eq!(reconnect_delay(1, ms(1_000), ms(10_000), -0.5), ms(900));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_relay_falls_back_to_simulation() {
        let config = ClientConfig {
            // Nothing listens on the discard port.
            relay_url: "ws://127.0.0.1:9/ws".into(),
            max_consecutive_failures: 2,
            ..ClientConfig::default()
        };
        let client = RelayClient::new(&config, "lobby", ms(100)).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(client.run(tx));

        match rx.recv().await {
            Some(NormalizedEvent::RoomInfo(info)) => assert_eq!(info.text, "[simulation mode active]"),
            other => panic!("expected simulation notice, got {other:?}"),
        }
        let simulated = rx.recv().await.unwrap();
        assert!(simulated.user().is_some_and(|user| user.username.starts_with('@')));
    }
}
