use std::time::Duration;

use futures::future::BoxFuture;
use rand::{Rng, seq::IndexedRandom};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use crate::source::{EventSource, SourceEvent, SourceResult};

const MIN_INTERVAL: Duration = Duration::from_millis(1);
const SIM_USERS: [&str; 8] = ["nova", "lyra", "kai", "zen", "mira", "zed", "luna", "juno"];
const SIM_REQUESTS: [&str; 2] = ["spotify:track:4uLU6hMCjMI75M1A2tKUQC", "Sandstorm"];

/// Event Source emitting provider-shaped traffic from a fixed roster of fake viewers.
///
/// Useful for running the whole pipeline without a live-chat provider.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    interval: Duration,
}

impl SimulatedSource {
    /// Create a source emitting one event every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
        }
    }
}

impl EventSource for SimulatedSource {
    fn connect(&self, room: &str) -> BoxFuture<'static, SourceResult<mpsc::Receiver<SourceEvent>>> {
        let interval = self.interval;
        let room = room.to_string();
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(64);
            tokio::spawn(async move {
                if tx.send(SourceEvent::new("connected", Value::Null)).await.is_err() {
                    return;
                }
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let (kind, payload) = simulated_payload(&mut rand::rng());
                    if tx.send(SourceEvent::new(kind, payload)).await.is_err() {
                        debug!(room = %room, "simulated source receiver dropped");
                        break;
                    }
                }
            });
            Ok(rx)
        })
    }
}

/// Produce one random provider-shaped payload: mostly votes, some track requests, gifts and
/// likes.
pub fn simulated_payload<R: Rng + ?Sized>(rng: &mut R) -> (&'static str, Value) {
    let user = *SIM_USERS.choose(rng).unwrap_or(&"nova");
    let author = json!({
        "secUid": format!("sim:{user}"),
        "uniqueId": user,
        "nickname": user.to_uppercase(),
        "profilePictureUrl": "",
    });

    let roll: f64 = rng.random();
    if roll < 0.65 {
        let comment = if rng.random_bool(0.2) {
            let request = *SIM_REQUESTS.choose(rng).unwrap_or(&"Sandstorm");
            format!("!battle {request}")
        } else if rng.random_bool(0.5) {
            "!a".to_string()
        } else {
            "!b".to_string()
        };
        ("chat", json!({ "user": author, "comment": comment }))
    } else if roll < 0.85 {
        let diamonds = if rng.random_bool(0.5) { 10 } else { 1 };
        (
            "gift",
            json!({ "user": author, "gift": { "name": "Rose", "diamond_count": diamonds } }),
        )
    } else {
        ("like", json!({ "user": author }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceEventKind;

    #[test]
    fn payloads_carry_a_simulated_author() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let (kind, payload) = simulated_payload(&mut rng);
            assert!(matches!(kind, "chat" | "gift" | "like"));
            let sec_uid = payload["user"]["secUid"].as_str().unwrap();
            assert!(sec_uid.starts_with("sim:"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn source_announces_connection_then_streams() {
        let source = SimulatedSource::new(Duration::from_millis(10));
        let mut rx = source.connect("lobby").await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, SourceEventKind::Connected);

        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.kind,
            SourceEventKind::Chat | SourceEventKind::Gift | SourceEventKind::Like
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_streams() {
        let mut rx = SimulatedSource::new(Duration::ZERO).connect("lobby").await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, SourceEventKind::Connected);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }
}
