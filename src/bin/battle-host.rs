//! Battle host: joins a relay room as a viewer and runs the song battle on its audience feed.

use std::sync::Arc;

use anyhow::Context;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, mpsc},
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use song_battle::{
    battle::{
        client::RelayClient,
        engine::{BattleEngine, EngineCommand, EngineHandle},
        playback::{LoggingSink, StaticCatalog},
        queue::Requester,
        router::{CommandRouter, Intent},
    },
    config::AppConfig,
    dto::event::NormalizedEvent,
};

/// Relayed events buffered between the transport and the router.
const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let room = config.client_room().to_owned();

    let catalog = StaticCatalog::new(config.catalog.clone());
    if catalog.is_empty() {
        warn!("catalog is empty; track requests will not resolve");
    }

    let router = Arc::new(CommandRouter::new());
    let (subscription, intents) = router.subscribe();
    let (engine, handle) = BattleEngine::new(
        config.battle.clone(),
        Arc::new(LoggingSink),
        Arc::new(catalog),
        intents,
    );
    tokio::spawn(engine.run());
    if config.battle.auto_start {
        handle.start();
    }

    let client = RelayClient::new(
        &config.client,
        &room,
        config.relay.simulation_interval(),
    )
    .context("configuring relay client")?;
    info!(url = %client.url(), room = %room, "battle host starting");

    let (events_tx, mut events) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(client.run(events_tx));
    tokio::spawn(log_feed(handle.feed()));
    tokio::spawn(log_stage_changes(handle.clone()));
    tokio::spawn(read_console(handle.clone()));

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("relay feed ended");
                    break;
                };
                router.dispatch(&event);
                handle.publish(event);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    router.unsubscribe(subscription);
    Ok(())
}

/// Print chat lines and notices as they flow through the engine.
async fn log_feed(mut feed: broadcast::Receiver<NormalizedEvent>) {
    loop {
        match feed.recv().await {
            Ok(NormalizedEvent::Chat(chat)) => info!(user = %chat.user.username, "{}", chat.text),
            Ok(NormalizedEvent::RoomInfo(notice)) => info!("{}", notice.text),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "feed logger lagged")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_stage_changes(handle: EngineHandle) {
    let mut snapshots = handle.snapshots();
    let mut last = None;
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        if last == Some((snapshot.stage, snapshot.stage_version)) {
            continue;
        }
        last = Some((snapshot.stage, snapshot.stage_version));
        info!(
            stage = %snapshot.stage,
            version = snapshot.stage_version,
            votes_a = snapshot.votes_a,
            votes_b = snapshot.votes_b,
            hype = snapshot.hype,
            queued = snapshot.queue.len(),
            "battle stage"
        );
    }
}

/// Console shortcuts: `n` start, `s` skip stage, `p` pause/resume, `q` demo pair.
async fn read_console(handle: EngineHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let command = match line.trim() {
            "n" => EngineCommand::Start,
            "s" => EngineCommand::Skip,
            "p" => EngineCommand::PauseResume,
            "q" => EngineCommand::Intent(Intent::DemoPair {
                requester: Requester {
                    id: "host".into(),
                    display_name: "Host".into(),
                    username: "@host".into(),
                },
            }),
            "" => continue,
            other => {
                warn!(input = %other, "unknown console command (n, s, p, q)");
                continue;
            }
        };
        if !handle.send(command) {
            break;
        }
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
