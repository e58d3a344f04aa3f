use std::time::Duration;

use tokio::time::Instant;

/// Identifier of a scheduled timer, usable with [`TimerScheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct TimerRecord<A> {
    id: TimerId,
    due: Instant,
    /// Stage version at schedule time; `None` for timers that outlive version bumps.
    version: Option<u64>,
    canceled: bool,
    action: A,
}

/// Single-shot delayed actions tagged with the stage version active when they were scheduled.
///
/// The scheduler never sleeps itself: the owner asks for [`next_deadline`](Self::next_deadline),
/// waits, and pulls due actions with [`pop_due`](Self::pop_due). An action fires only if it was
/// not canceled, its version still matches the current one and the scheduler is not paused.
///
/// Pausing freezes time: nothing fires while paused and every pending deadline is pushed back by
/// the paused duration on resume, so each timer keeps the remaining time it had.
#[derive(Debug)]
pub struct TimerScheduler<A> {
    next_id: u64,
    version: u64,
    paused_at: Option<Instant>,
    timers: Vec<TimerRecord<A>>,
}

impl<A> Default for TimerScheduler<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> TimerScheduler<A> {
    /// Create an empty scheduler at version 0.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            version: 0,
            paused_at: None,
            timers: Vec::new(),
        }
    }

    /// Current stage version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether firing is currently suppressed.
    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Number of timers that may still fire.
    pub fn pending(&self) -> usize {
        self.timers
            .iter()
            .filter(|timer| self.is_live(timer))
            .count()
    }

    /// Schedule `action` after `delay`, tagged with the current version.
    pub fn schedule(&mut self, now: Instant, delay: Duration, action: A) -> TimerId {
        let version = Some(self.version);
        self.insert(now, delay, version, action)
    }

    /// Schedule `action` after `delay` without a version tag; only [`cancel`](Self::cancel)
    /// and pausing affect it.
    pub fn schedule_unversioned(&mut self, now: Instant, delay: Duration, action: A) -> TimerId {
        self.insert(now, delay, None, action)
    }

    fn insert(&mut self, now: Instant, delay: Duration, version: Option<u64>, action: A) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        // While paused the clock is frozen at the pause instant.
        let base = self.paused_at.unwrap_or(now);
        self.timers.push(TimerRecord {
            id,
            due: base + delay,
            version,
            canceled: false,
            action,
        });
        id
    }

    /// Cancel one timer. Returns `false` when it already fired or was dropped.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.iter_mut().find(|timer| timer.id == id) {
            Some(timer) if !timer.canceled => {
                timer.canceled = true;
                true
            }
            _ => false,
        }
    }

    /// Increment the version and cancel every pending versioned timer.
    ///
    /// Timers from [`schedule_unversioned`](Self::schedule_unversioned) are not canceled: they
    /// outlive stage changes and only [`cancel`](Self::cancel) removes them.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        for timer in self.timers.iter_mut().filter(|timer| timer.version.is_some()) {
            timer.canceled = true;
        }
        self.timers.retain(|timer| !timer.canceled);
        self.version
    }

    /// Suppress firing. Returns `false` if already paused.
    pub fn pause(&mut self, now: Instant) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(now);
        true
    }

    /// Resume firing, shifting pending deadlines by the time spent paused. Returns `false` if
    /// not paused.
    pub fn resume(&mut self, now: Instant) -> bool {
        let Some(paused_at) = self.paused_at.take() else {
            return false;
        };
        let frozen = now.saturating_duration_since(paused_at);
        for timer in &mut self.timers {
            timer.due += frozen;
        }
        true
    }

    /// Earliest instant at which a live timer becomes due; `None` while paused or idle.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_paused() {
            return None;
        }
        self.timers
            .iter()
            .filter(|timer| self.is_live(timer))
            .map(|timer| timer.due)
            .min()
    }

    /// Remove and return the earliest due action that passes the firing check.
    ///
    /// Call it in a loop, applying each action before pulling the next, so an action that bumps
    /// the version invalidates the rest of the batch.
    pub fn pop_due(&mut self, now: Instant) -> Option<A> {
        if self.is_paused() {
            return None;
        }
        let current = self.version;
        self.timers.retain(|timer| {
            !timer.canceled && timer.version.is_none_or(|version| version == current)
        });
        let index = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.due <= now)
            .min_by_key(|(_, timer)| (timer.due, timer.id.0))
            .map(|(index, _)| index)?;
        Some(self.timers.remove(index).action)
    }

    fn is_live(&self, timer: &TimerRecord<A>) -> bool {
        !timer.canceled && timer.version.is_none_or(|version| version == self.version)
    }
}
