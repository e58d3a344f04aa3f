use std::{collections::HashMap, fmt, time::Duration};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    battle::{
        hype::Hype,
        playback::Track,
        queue::{AdmissionQueue, CommitOutcome, Pair, QueueEntry, Requester},
        router::Side,
        timer::TimerScheduler,
    },
    config::BattleConfig,
    dto::battle::{BattleSnapshot, vote_percentages},
};

/// Stages of one battle, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    /// Waiting for a complete pair.
    #[serde(rename = "intro")]
    Intro,
    /// Round one, track A.
    #[serde(rename = "r1A_play")]
    R1APlay,
    /// Round one, track B.
    #[serde(rename = "r1B_play")]
    R1BPlay,
    /// First voting window.
    #[serde(rename = "vote1")]
    Vote1,
    /// Round two, track A.
    #[serde(rename = "r2A_play")]
    R2APlay,
    /// Round two, track B.
    #[serde(rename = "r2B_play")]
    R2BPlay,
    /// Final voting window.
    #[serde(rename = "vote2")]
    Vote2,
    /// Winner announcement.
    #[serde(rename = "winner")]
    Winner,
    /// Winner replayed.
    #[serde(rename = "victory_play")]
    VictoryPlay,
    /// Cycle complete; resets and returns to intro.
    #[serde(rename = "finished")]
    Finished,
}

impl Stage {
    /// Following stage in the cycle; `Finished` wraps to `Intro`.
    pub fn next(self) -> Self {
        match self {
            Stage::Intro => Stage::R1APlay,
            Stage::R1APlay => Stage::R1BPlay,
            Stage::R1BPlay => Stage::Vote1,
            Stage::Vote1 => Stage::R2APlay,
            Stage::R2APlay => Stage::R2BPlay,
            Stage::R2BPlay => Stage::Vote2,
            Stage::Vote2 => Stage::Winner,
            Stage::Winner => Stage::VictoryPlay,
            Stage::VictoryPlay => Stage::Finished,
            Stage::Finished => Stage::Intro,
        }
    }

    /// Wire name of the stage.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Intro => "intro",
            Stage::R1APlay => "r1A_play",
            Stage::R1BPlay => "r1B_play",
            Stage::Vote1 => "vote1",
            Stage::R2APlay => "r2A_play",
            Stage::R2BPlay => "r2B_play",
            Stage::Vote2 => "vote2",
            Stage::Winner => "winner",
            Stage::VictoryPlay => "victory_play",
            Stage::Finished => "finished",
        }
    }

    /// Whether votes are accepted while in this stage.
    pub fn accepts_votes(self) -> bool {
        matches!(self, Stage::Vote1 | Stage::Vote2)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which round and side a play instruction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayLabel {
    /// Round one, side A.
    A1,
    /// Round one, side B.
    B1,
    /// Round two, side A.
    A2,
    /// Round two, side B.
    B2,
}

impl fmt::Display for PlayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlayLabel::A1 => "A1",
            PlayLabel::B1 => "B1",
            PlayLabel::A2 => "A2",
            PlayLabel::B2 => "B2",
        };
        f.write_str(label)
    }
}

/// Side effect requested by a transition, executed by the owner of the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A new stage was entered.
    StageChanged {
        /// Stage entered.
        stage: Stage,
        /// Version of that stage.
        version: u64,
    },
    /// Start a track from the beginning.
    Play {
        /// Track to play.
        track: Track,
        /// Round and side being played.
        label: PlayLabel,
    },
    /// Start a track at a position.
    ResumeAt {
        /// Track to play.
        track: Track,
        /// Start position.
        position_ms: u64,
    },
    /// User-visible system line.
    Notice(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    Advance(Stage),
    IntroCheck,
    HypeDecay,
}

/// Mutable battle data. Only [`BattleStateMachine`] writes to it.
#[derive(Debug, Clone)]
pub struct BattleState {
    /// Current stage.
    pub stage: Stage,
    /// Votes for A across both windows.
    pub votes_a: u32,
    /// Votes for B across both windows.
    pub votes_b: u32,
    /// First choice of each voter in the current voting window.
    pub voter_choices: HashMap<String, Side>,
    /// Hype meter.
    pub hype: Hype,
    /// Winner of the last final vote.
    pub winner: Option<QueueEntry>,
    /// Contenders of the current battle.
    pub pair: Pair,
}

/// Winner of a finished vote. Ties go to A.
pub fn resolve_winner(votes_a: u32, votes_b: u32) -> Side {
    if votes_a >= votes_b { Side::A } else { Side::B }
}

/// Timer-driven battle cycle over the admission queue.
///
/// The machine is synchronous and clock-injected: every call takes `now` and returns the
/// effects to execute. The owner sleeps until [`next_deadline`](Self::next_deadline) and then
/// calls [`fire_due`](Self::fire_due).
///
/// Every manual stage jump bumps the stage version, which drops all automatic transitions
/// scheduled before it. Hype decays are not versioned and survive those jumps.
#[derive(Debug)]
pub struct BattleStateMachine {
    config: BattleConfig,
    state: BattleState,
    queue: AdmissionQueue,
    timers: TimerScheduler<TimerAction>,
    started: bool,
}

impl BattleStateMachine {
    /// Idle machine in `intro`; nothing is scheduled before [`Self::start`].
    pub fn new(config: BattleConfig) -> Self {
        let queue = AdmissionQueue::new(
            Duration::from_millis(config.requester_cooldown_ms),
            Duration::from_millis(config.recent_add_window_ms),
        );
        let hype = Hype::new(config.hype_min_gain, config.hype_max_gain, config.hype_decay);
        Self {
            config,
            state: BattleState {
                stage: Stage::Intro,
                votes_a: 0,
                votes_b: 0,
                voter_choices: HashMap::new(),
                hype,
                winner: None,
                pair: Pair::default(),
            },
            queue,
            timers: TimerScheduler::new(),
            started: false,
        }
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    /// Version bumped on every stage change.
    pub fn stage_version(&self) -> u64 {
        self.timers.version()
    }

    /// Read-only view of the battle data.
    pub fn state(&self) -> &BattleState {
        &self.state
    }

    /// Read-only view of the queue.
    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    /// Whether the timer chain is frozen.
    pub fn is_paused(&self) -> bool {
        self.timers.is_paused()
    }

    /// Whether [`Self::start`] has run.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// When the next automatic transition or decay is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Begin automatic sequencing from the intro. Later calls do nothing.
    pub fn start(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.started {
            return effects;
        }
        self.started = true;
        info!("battle sequencing started");
        self.enter(Stage::Intro, now, &mut effects);
        effects
    }

    /// Run every timer due at `now`, in deadline order.
    pub fn fire_due(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        while let Some(action) = self.timers.pop_due(now) {
            match action {
                TimerAction::Advance(stage) => self.enter(stage, now, &mut effects),
                TimerAction::IntroCheck => {
                    if self.state.stage == Stage::Intro {
                        self.intro_check(now, &mut effects);
                    }
                }
                TimerAction::HypeDecay => {
                    let level = self.state.hype.decay();
                    debug!(hype = level, "hype decayed");
                }
            }
        }
        effects
    }

    /// Force the next stage, invalidating pending automatic transitions. In the intro without
    /// a pair this only retries the preview.
    pub fn skip_stage(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.started = true;
        let from = self.state.stage;
        let version = self.timers.bump_version();
        info!(from = %from, version, "stage skipped");

        if from == Stage::Intro && !self.state.pair.is_complete() {
            self.intro_check(now, &mut effects);
        } else {
            self.enter(from.next(), now, &mut effects);
        }
        effects
    }

    /// Toggle the pause flag. Pending timers keep their remaining time.
    pub fn pause_resume(&mut self, now: Instant) -> Vec<Effect> {
        let notice = if self.timers.is_paused() {
            self.timers.resume(now);
            info!(stage = %self.state.stage, "battle resumed");
            "Battle resumed."
        } else {
            self.timers.pause(now);
            info!(stage = %self.state.stage, "battle paused");
            "Battle paused."
        };
        vec![Effect::Notice(notice.into())]
    }

    /// Count a vote if voting is open and `user_id` has not voted in this window.
    pub fn cast_vote(&mut self, user_id: &str, side: Side) -> bool {
        if !self.state.stage.accepts_votes() || self.state.voter_choices.contains_key(user_id) {
            return false;
        }
        self.state.voter_choices.insert(user_id.to_owned(), side);
        match side {
            Side::A => self.state.votes_a += 1,
            Side::B => self.state.votes_b += 1,
        }
        true
    }

    /// Raise hype for a gift, schedule its decay and boost the sender's track for large gifts.
    pub fn gift(&mut self, user_id: &str, value: u64, now: Instant) -> u8 {
        let level = self.state.hype.apply_gift(value);
        // Decays outlive stage changes so every gift's gain is eventually taken back.
        self.timers.schedule_unversioned(
            now,
            Duration::from_millis(self.config.hype_decay_delay_ms),
            TimerAction::HypeDecay,
        );
        if value >= self.config.boost_threshold && self.queue.boost(user_id) {
            info!(user = %user_id, value, "queued track boosted to the front");
        }
        level
    }

    /// Offer a track to the admission queue.
    pub fn enqueue(&mut self, track: &Track, requester: &Requester, now: Instant) -> bool {
        self.queue.enqueue(track, requester, now)
    }

    /// Preview the head of the queue again, showing it as the upcoming pair while in the intro.
    pub fn refresh_preview(&mut self) -> Pair {
        let pair = self.queue.preview_pair();
        if self.state.stage == Stage::Intro {
            self.state.pair = pair.clone();
        }
        pair
    }

    /// Observer view of the current state.
    pub fn snapshot(&self) -> BattleSnapshot {
        let (percent_a, percent_b) = vote_percentages(self.state.votes_a, self.state.votes_b);
        BattleSnapshot {
            stage: self.state.stage,
            stage_version: self.timers.version(),
            votes_a: self.state.votes_a,
            votes_b: self.state.votes_b,
            percent_a,
            percent_b,
            voting: self.state.stage.accepts_votes(),
            hype: self.state.hype.level(),
            paused: self.timers.is_paused(),
            pair: self.state.pair.clone(),
            winner: self.state.winner.clone(),
            queue: self.queue.entries(),
        }
    }

    fn schedule(&mut self, now: Instant, delay_ms: u64, action: TimerAction) {
        self.timers
            .schedule(now, Duration::from_millis(delay_ms), action);
    }

    fn enter(&mut self, stage: Stage, now: Instant, effects: &mut Vec<Effect>) {
        self.state.stage = stage;
        let version = self.timers.version();
        info!(stage = %stage, version, "stage entered");
        effects.push(Effect::StageChanged { stage, version });

        match stage {
            Stage::Intro => self.intro_check(now, effects),
            Stage::R1APlay => {
                self.state.pair = self.commit_pair();
                self.play(Side::A, PlayLabel::A1, effects);
                self.schedule(now, self.config.play_ms, TimerAction::Advance(Stage::R1BPlay));
            }
            Stage::R1BPlay => {
                self.play(Side::B, PlayLabel::B1, effects);
                self.schedule(now, self.config.play_ms, TimerAction::Advance(Stage::Vote1));
            }
            Stage::Vote1 => {
                self.state.voter_choices.clear();
                self.schedule(now, self.config.vote_ms, TimerAction::Advance(Stage::R2APlay));
            }
            Stage::R2APlay => {
                self.play(Side::A, PlayLabel::A2, effects);
                self.schedule(now, self.config.play_ms, TimerAction::Advance(Stage::R2BPlay));
            }
            Stage::R2BPlay => {
                self.play(Side::B, PlayLabel::B2, effects);
                self.schedule(now, self.config.play_ms, TimerAction::Advance(Stage::Vote2));
            }
            Stage::Vote2 => {
                self.state.voter_choices.clear();
                self.schedule(now, self.config.vote_ms, TimerAction::Advance(Stage::Winner));
            }
            Stage::Winner => {
                let side = resolve_winner(self.state.votes_a, self.state.votes_b);
                self.state.winner = self.entry(side).cloned();
                match &self.state.winner {
                    Some(winner) => {
                        info!(side = ?side, track = %winner.track_id, votes_a = self.state.votes_a, votes_b = self.state.votes_b, "winner resolved");
                        effects.push(Effect::Notice(format!("Winner: {}", winner.title)));
                    }
                    None => warn!(side = ?side, "winner resolved without a track"),
                }
                self.schedule(now, self.config.winner_delay_ms, TimerAction::Advance(Stage::VictoryPlay));
            }
            Stage::VictoryPlay => {
                if let Some(winner) = &self.state.winner {
                    effects.push(Effect::ResumeAt {
                        track: winner.track(),
                        position_ms: self.victory_offset(winner.duration_ms),
                    });
                }
                self.schedule(now, self.config.victory_ms, TimerAction::Advance(Stage::Finished));
            }
            Stage::Finished => {
                self.state.votes_a = 0;
                self.state.votes_b = 0;
                self.state.voter_choices.clear();
                self.state.pair = Pair::default();
                self.state.winner = None;
                let version = self.timers.bump_version();

                self.state.stage = Stage::Intro;
                info!(stage = %Stage::Intro, version, "battle reset");
                effects.push(Effect::StageChanged {
                    stage: Stage::Intro,
                    version,
                });
                self.schedule(now, self.config.settle_ms, TimerAction::IntroCheck);
            }
        }
    }

    /// Advance to round one once a full pair is available, otherwise retry later.
    fn intro_check(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        if !self.state.pair.is_complete() {
            self.state.pair = self.queue.preview_pair();
        }
        if self.state.pair.is_complete() {
            self.enter(Stage::R1APlay, now, effects);
        } else {
            debug!(queued = self.queue.len(), "waiting for a full pair");
            self.schedule(now, self.config.intro_retry_ms, TimerAction::IntroCheck);
        }
    }

    fn commit_pair(&mut self) -> Pair {
        match self.queue.commit_pair() {
            CommitOutcome::Committed(pair) => pair,
            CommitOutcome::Unchanged(_) => {
                // The head moved since the preview (a boost); take the current head instead.
                debug!("queue head changed since preview");
                self.queue.preview_pair();
                match self.queue.commit_pair() {
                    CommitOutcome::Committed(pair) | CommitOutcome::Unchanged(pair) => pair,
                }
            }
        }
    }

    fn entry(&self, side: Side) -> Option<&QueueEntry> {
        match side {
            Side::A => self.state.pair.a.as_ref(),
            Side::B => self.state.pair.b.as_ref(),
        }
    }

    fn play(&self, side: Side, label: PlayLabel, effects: &mut Vec<Effect>) {
        match self.entry(side) {
            Some(entry) => effects.push(Effect::Play {
                track: entry.track(),
                label,
            }),
            None => warn!(label = %label, "no track to play"),
        }
    }

    /// Short tracks, and tracks of unknown length, resume near their start.
    fn victory_offset(&self, duration_ms: Option<u64>) -> u64 {
        match duration_ms {
            Some(duration) if duration >= self.config.victory_short_track_ms => {
                self.config.victory_offset_ms
            }
            _ => self.config.victory_short_offset_ms,
        }
    }
}
