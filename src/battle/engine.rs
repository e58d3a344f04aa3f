use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, mpsc, watch},
    time::{Instant, sleep_until, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    battle::{
        playback::{Catalog, PlaybackResult, PlaybackSink, Track, TrackQuery, resolve},
        queue::Requester,
        router::Intent,
        state_machine::{BattleStateMachine, Effect},
    },
    config::BattleConfig,
    dto::{battle::BattleSnapshot, event::NormalizedEvent},
    error::ServiceError,
};

/// Capacity of the feed of relayed events and notices.
const FEED_CAPACITY: usize = 256;

/// Operator and internal requests handled by the engine task.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Begin automatic sequencing.
    Start,
    /// Jump to the next stage.
    Skip,
    /// Toggle pause.
    PauseResume,
    /// Intent classified from a relayed event.
    Intent(Intent),
    /// A resolved track ready for the admission queue.
    Enqueue { track: Track, requester: Requester },
}

/// Cloneable handle to a running [`BattleEngine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    feed: broadcast::Sender<NormalizedEvent>,
    snapshots: watch::Receiver<BattleSnapshot>,
}

impl EngineHandle {
    /// Queue a command. Returns `false` once the engine has stopped.
    pub fn send(&self, command: EngineCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Begin automatic sequencing.
    pub fn start(&self) -> bool {
        self.send(EngineCommand::Start)
    }

    /// Skip the current stage.
    pub fn skip(&self) -> bool {
        self.send(EngineCommand::Skip)
    }

    /// Pause or resume the timer chain.
    pub fn pause_resume(&self) -> bool {
        self.send(EngineCommand::PauseResume)
    }

    /// Re-publish a relayed event on the feed.
    pub fn publish(&self, event: NormalizedEvent) {
        let _ = self.feed.send(event);
    }

    /// Relayed events interleaved with engine notices.
    pub fn feed(&self) -> broadcast::Receiver<NormalizedEvent> {
        self.feed.subscribe()
    }

    /// Latest battle snapshot, updated after every engine step.
    pub fn snapshots(&self) -> watch::Receiver<BattleSnapshot> {
        self.snapshots.clone()
    }
}

/// Single task owning the [`BattleStateMachine`].
///
/// Intents, commands and timer deadlines are handled one at a time so state has a single
/// writer. Playback and catalog calls run in their own tasks, bounded by the sink timeout, and
/// never delay the timer chain; a resolved track comes back as [`EngineCommand::Enqueue`].
pub struct BattleEngine {
    machine: BattleStateMachine,
    config: BattleConfig,
    sink: Arc<dyn PlaybackSink>,
    catalog: Arc<dyn Catalog>,
    intents: mpsc::UnboundedReceiver<Intent>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    /// Weak so the engine stops once every handle and in-flight lookup is gone.
    loopback: mpsc::WeakUnboundedSender<EngineCommand>,
    feed: broadcast::Sender<NormalizedEvent>,
    snapshots: watch::Sender<BattleSnapshot>,
}

impl BattleEngine {
    /// Build the engine and the handle that drives it. Nothing runs until [`Self::run`] is awaited.
    pub fn new(
        config: BattleConfig,
        sink: Arc<dyn PlaybackSink>,
        catalog: Arc<dyn Catalog>,
        intents: mpsc::UnboundedReceiver<Intent>,
    ) -> (Self, EngineHandle) {
        let machine = BattleStateMachine::new(config.clone());
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let (snapshots, snapshots_rx) = watch::channel(machine.snapshot());

        let handle = EngineHandle {
            commands: commands_tx.clone(),
            feed: feed.clone(),
            snapshots: snapshots_rx,
        };
        let engine = Self {
            machine,
            config,
            sink,
            catalog,
            intents,
            commands,
            loopback: commands_tx.downgrade(),
            feed,
            snapshots,
        };
        (engine, handle)
    }

    /// Drive the battle until every [`EngineHandle`] is dropped.
    pub async fn run(mut self) {
        let mut intents_open = true;
        loop {
            let deadline = self.machine.next_deadline();
            let effects = tokio::select! {
                intent = self.intents.recv(), if intents_open => match intent {
                    Some(intent) => self.handle_intent(intent),
                    None => {
                        debug!("intent stream closed");
                        intents_open = false;
                        Vec::new()
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = wait_until(deadline) => self.machine.fire_due(Instant::now()),
            };
            self.execute(effects);
            self.snapshots.send_replace(self.machine.snapshot());
        }
        info!("battle engine stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) -> Vec<Effect> {
        let now = Instant::now();
        match command {
            EngineCommand::Start => self.machine.start(now),
            EngineCommand::Skip => self.machine.skip_stage(now),
            EngineCommand::PauseResume => self.machine.pause_resume(now),
            EngineCommand::Intent(intent) => self.handle_intent(intent),
            EngineCommand::Enqueue { track, requester } => {
                if self.machine.enqueue(&track, &requester, now) {
                    info!(track = %track.id, requester = %requester.id, queued = self.machine.queue().len(), "track queued");
                    vec![Effect::Notice(format!(
                        "Queued: {} — requested by {}",
                        track.title, requester.username
                    ))]
                } else {
                    debug!(track = %track.id, requester = %requester.id, "queue submission rejected");
                    Vec::new()
                }
            }
        }
    }

    fn handle_intent(&mut self, intent: Intent) -> Vec<Effect> {
        match intent {
            Intent::Vote { user_id, side } => {
                if self.machine.cast_vote(&user_id, side) {
                    debug!(user = %user_id, side = ?side, "vote counted");
                }
                Vec::new()
            }
            Intent::Gift {
                user_id,
                username,
                value,
            } => {
                let hype = self.machine.gift(&user_id, value, Instant::now());
                debug!(user = %username, value, hype, "gift received");
                Vec::new()
            }
            Intent::QueueAdd { query, requester } => {
                self.resolve_request(query, requester);
                Vec::new()
            }
            Intent::DemoPair { requester } => {
                if self.machine.queue().len() >= 2 {
                    self.machine.refresh_preview();
                    vec![Effect::Notice("Next pair prepared.".into())]
                } else {
                    self.seed_demo_pair(requester);
                    Vec::new()
                }
            }
        }
    }

    fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.config.sink_timeout_ms)
    }

    fn resolve_request(&self, query: TrackQuery, requester: Requester) {
        let Some(loopback) = self.loopback.upgrade() else {
            return;
        };
        let catalog = self.catalog.clone();
        let feed = self.feed.clone();
        let limit = self.sink_timeout();
        tokio::spawn(async move {
            match bounded(limit, resolve(catalog.as_ref(), &query)).await {
                Ok(Some(track)) => {
                    let _ = loopback.send(EngineCommand::Enqueue { track, requester });
                }
                Ok(None) => {
                    debug!(query = ?query, "no track found");
                    notify(&feed, "No track found for your query.");
                }
                Err(err) => {
                    warn!(query = ?query, error = %err, "track search failed");
                    notify(&feed, format!("Search failed: {err}"));
                }
            }
        });
    }

    /// Fill the queue from the demo seed query. Each seed gets its own synthetic requester so
    /// the per-requester cooldown does not reject the second one.
    fn seed_demo_pair(&self, requester: Requester) {
        let Some(loopback) = self.loopback.upgrade() else {
            return;
        };
        let catalog = self.catalog.clone();
        let feed = self.feed.clone();
        let limit = self.sink_timeout();
        let query = self.config.demo_seed_query.clone();
        let count = self.config.demo_seed_count;
        tokio::spawn(async move {
            match bounded(limit, catalog.search(&query, count)).await {
                Ok(tracks) if tracks.is_empty() => notify(&feed, "No track found for your query."),
                Ok(tracks) => {
                    info!(seeds = tracks.len(), requester = %requester.id, "seeding demo pair");
                    for (n, track) in tracks.into_iter().enumerate() {
                        let seed = Requester {
                            id: format!("demo:{n}"),
                            display_name: requester.display_name.clone(),
                            username: requester.username.clone(),
                        };
                        let _ = loopback.send(EngineCommand::Enqueue {
                            track,
                            requester: seed,
                        });
                    }
                }
                Err(err) => {
                    warn!(error = %err, "demo seed search failed");
                    notify(&feed, format!("Search failed: {err}"));
                }
            }
        });
    }

    fn execute(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StageChanged { stage, version } => {
                    debug!(stage = %stage, version, "stage change published");
                }
                Effect::Play { track, label } => {
                    let call = self.sink.play(track);
                    self.spawn_sink_call(format!("play {label}"), call);
                }
                Effect::ResumeAt { track, position_ms } => {
                    let call = self.sink.resume_at(track, position_ms);
                    self.spawn_sink_call(format!("resume at {position_ms} ms"), call);
                }
                Effect::Notice(text) => notify(&self.feed, text),
            }
        }
    }

    fn spawn_sink_call(
        &self,
        what: String,
        call: impl Future<Output = PlaybackResult<()>> + Send + 'static,
    ) {
        let feed = self.feed.clone();
        let limit = self.sink_timeout();
        tokio::spawn(async move {
            if let Err(err) = bounded(limit, call).await {
                warn!(action = %what, error = %err, "playback sink call failed");
                notify(&feed, format!("Playback failed ({what}): {err}"));
            }
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = PlaybackResult<T>>,
) -> Result<T, ServiceError> {
    match timeout(limit, call).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(_) => Err(ServiceError::Timeout),
    }
}

fn notify(feed: &broadcast::Sender<NormalizedEvent>, text: impl Into<String>) {
    // No subscriber is not an error.
    let _ = feed.send(NormalizedEvent::room_info(text));
}
