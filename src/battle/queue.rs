use std::{collections::HashMap, time::Duration};

use indexmap::IndexMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::{battle::playback::Track, dto::now_millis};

/// Viewer who asked for a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    /// Stable identifier used for cooldowns and boosts.
    pub id: String,
    /// Name shown in notices.
    pub display_name: String,
    /// `@`-prefixed handle.
    pub username: String,
}

/// A track waiting in the queue, with who asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Dedup key.
    pub track_id: String,
    /// Playable URI.
    pub uri: String,
    /// Display title.
    pub title: String,
    /// Cover art URL.
    pub image: String,
    /// Artist names.
    pub artists: Vec<String>,
    /// Length, when known.
    pub duration_ms: Option<u64>,
    /// Requester identifier.
    pub requester_id: String,
    /// Requester display name.
    pub requester_display_name: String,
    /// Requester `@`-handle.
    pub requester_username: String,
    /// Epoch milliseconds.
    pub enqueued_at: i64,
}

impl QueueEntry {
    fn new(track: &Track, requester: &Requester) -> Self {
        Self {
            track_id: track.id.clone(),
            uri: track.uri.clone(),
            title: track.title.clone(),
            image: track.image.clone(),
            artists: track.artists.clone(),
            duration_ms: track.duration_ms,
            requester_id: requester.id.clone(),
            requester_display_name: requester.display_name.clone(),
            requester_username: requester.username.clone(),
            enqueued_at: now_millis(),
        }
    }

    /// The playable track behind this entry.
    pub fn track(&self) -> Track {
        Track {
            id: self.track_id.clone(),
            uri: self.uri.clone(),
            title: self.title.clone(),
            image: self.image.clone(),
            artists: self.artists.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

/// The two contenders of a battle. Either side may be missing while the queue is short.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pair {
    /// First contender.
    #[serde(rename = "A")]
    pub a: Option<QueueEntry>,
    /// Second contender.
    #[serde(rename = "B")]
    pub b: Option<QueueEntry>,
}

impl Pair {
    /// Both sides are present.
    pub fn is_complete(&self) -> bool {
        self.a.is_some() && self.b.is_some()
    }

    fn ids(&self) -> Option<(String, String)> {
        match (&self.a, &self.b) {
            (Some(a), Some(b)) => Some((a.track_id.clone(), b.track_id.clone())),
            _ => None,
        }
    }
}

/// Result of [`AdmissionQueue::commit_pair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The previewed pair was still at the head and has been removed from the queue.
    Committed(Pair),
    /// No matching preview; the queue is untouched and this is its current head.
    Unchanged(Pair),
}

/// Ordered, deduplicated queue of requested tracks with per-requester rate limiting.
///
/// Bookkeeping maps only ever grow or get overwritten with newer timestamps.
#[derive(Debug)]
pub struct AdmissionQueue {
    entries: IndexMap<String, QueueEntry>,
    recent_adds: HashMap<String, Instant>,
    last_request: HashMap<String, Instant>,
    latest_by_requester: HashMap<String, String>,
    previewed: Option<(String, String)>,
    requester_cooldown: Duration,
    recent_add_window: Duration,
}

impl AdmissionQueue {
    /// Empty queue with the given rate-limit windows.
    pub fn new(requester_cooldown: Duration, recent_add_window: Duration) -> Self {
        Self {
            entries: IndexMap::new(),
            recent_adds: HashMap::new(),
            last_request: HashMap::new(),
            latest_by_requester: HashMap::new(),
            previewed: None,
            requester_cooldown,
            recent_add_window,
        }
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in play order.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.values().cloned().collect()
    }

    /// Append `track` unless the requester is cooling down, the track is already queued, or it
    /// was added within the recent-add window. Rejections are silent.
    pub fn enqueue(&mut self, track: &Track, requester: &Requester, now: Instant) -> bool {
        if within(self.last_request.get(&requester.id), now, self.requester_cooldown) {
            debug!(requester = %requester.id, track = %track.id, "requester cooling down");
            return false;
        }
        if self.entries.contains_key(&track.id) {
            debug!(requester = %requester.id, track = %track.id, "track already queued");
            return false;
        }
        if within(self.recent_adds.get(&track.id), now, self.recent_add_window) {
            debug!(requester = %requester.id, track = %track.id, "track added too recently");
            return false;
        }

        self.entries
            .insert(track.id.clone(), QueueEntry::new(track, requester));
        self.recent_adds.insert(track.id.clone(), now);
        self.last_request.insert(requester.id.clone(), now);
        self.latest_by_requester
            .insert(requester.id.clone(), track.id.clone());
        true
    }

    fn head(&self) -> Pair {
        let mut front = self.entries.values().take(2).cloned();
        Pair {
            a: front.next(),
            b: front.next(),
        }
    }

    /// First two entries, left in place. A complete preview arms the next [`commit_pair`].
    ///
    /// [`commit_pair`]: Self::commit_pair
    pub fn preview_pair(&mut self) -> Pair {
        let pair = self.head();
        self.previewed = pair.ids();
        pair
    }

    /// Remove the head pair if it is still exactly the last previewed one.
    pub fn commit_pair(&mut self) -> CommitOutcome {
        let head = self.head();
        match (self.previewed.take(), head.ids()) {
            (Some(previewed), Some(current)) if previewed == current => {
                self.entries.shift_remove_index(0);
                self.entries.shift_remove_index(0);
                CommitOutcome::Committed(head)
            }
            // A stale preview is dropped; callers must preview again.
            _ => CommitOutcome::Unchanged(head),
        }
    }

    /// Move the requester's latest still-queued entry to the front. Returns whether it moved.
    pub fn boost(&mut self, requester_id: &str) -> bool {
        let Some(track_id) = self.latest_by_requester.get(requester_id) else {
            return false;
        };
        let position = self
            .entries
            .get_full(track_id)
            .filter(|(_, _, entry)| entry.requester_id == requester_id)
            .map(|(index, _, _)| index);
        match position {
            Some(index) if index > 0 => {
                self.entries.move_index(index, 0);
                true
            }
            _ => false,
        }
    }
}

fn within(last: Option<&Instant>, now: Instant, window: Duration) -> bool {
    last.is_some_and(|last| now.saturating_duration_since(*last) < window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::playback::tests::track;

    fn requester(id: &str) -> Requester {
        Requester {
            id: id.into(),
            display_name: id.into(),
            username: format!("@{id}"),
        }
    }

    fn queue() -> AdmissionQueue {
        AdmissionQueue::new(Duration::from_secs(5), Duration::from_secs(8))
    }

    fn ids(queue: &AdmissionQueue) -> Vec<String> {
        queue.entries().into_iter().map(|e| e.track_id).collect()
    }

    #[test]
    fn same_track_twice_within_window_adds_once() {
        let now = Instant::now();
        let mut queue = queue();

        assert!(queue.enqueue(&track("t1", "One"), &requester("u1"), now));
        assert!(!queue.enqueue(&track("t1", "One"), &requester("u2"), now + Duration::from_secs(1)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn requester_cooldown_rejects_same_and_different_tracks() {
        let now = Instant::now();
        let mut queue = queue();
        let later = now + Duration::from_secs(4);

        assert!(queue.enqueue(&track("t1", "One"), &requester("u1"), now));
        assert!(!queue.enqueue(&track("t1", "One"), &requester("u1"), later));
        assert!(!queue.enqueue(&track("t2", "Two"), &requester("u1"), later));
        assert_eq!(queue.len(), 1);

        assert!(queue.enqueue(&track("t2", "Two"), &requester("u1"), now + Duration::from_secs(5)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn recently_added_track_is_suppressed_after_removal() {
        let now = Instant::now();
        let mut queue = queue();
        queue.enqueue(&track("t1", "One"), &requester("u1"), now);
        queue.enqueue(&track("t2", "Two"), &requester("u2"), now);
        queue.preview_pair();
        assert!(matches!(queue.commit_pair(), CommitOutcome::Committed(_)));

        assert!(!queue.enqueue(&track("t1", "One"), &requester("u3"), now + Duration::from_secs(7)));
        assert!(queue.enqueue(&track("t1", "One"), &requester("u3"), now + Duration::from_secs(8)));
    }

    #[test]
    fn preview_then_commit_removes_exactly_that_pair() {
        let now = Instant::now();
        let mut queue = queue();
        for (i, id) in ["t1", "t2", "t3"].into_iter().enumerate() {
            queue.enqueue(&track(id, id), &requester(&format!("u{i}")), now);
        }

        let preview = queue.preview_pair();
        assert_eq!(queue.len(), 3);
        match queue.commit_pair() {
            CommitOutcome::Committed(pair) => assert_eq!(pair, preview),
            other => panic!("expected commit, got {other:?}"),
        }
        assert_eq!(ids(&queue), vec!["t3"]);

        // No fresh preview: second commit is a no-op.
        assert!(matches!(queue.commit_pair(), CommitOutcome::Unchanged(_)));
        assert_eq!(ids(&queue), vec!["t3"]);
    }

    #[test]
    fn commit_after_head_changed_leaves_queue_untouched() {
        let now = Instant::now();
        let mut queue = queue();
        queue.enqueue(&track("t1", "One"), &requester("u1"), now);
        queue.enqueue(&track("t2", "Two"), &requester("u2"), now);
        queue.enqueue(&track("t3", "Three"), &requester("u3"), now);
        queue.preview_pair();

        assert!(queue.boost("u3"));
        match queue.commit_pair() {
            CommitOutcome::Unchanged(head) => {
                assert_eq!(head.a.map(|e| e.track_id), Some("t3".into()));
            }
            other => panic!("expected unchanged, got {other:?}"),
        }
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn incomplete_preview_does_not_arm_commit() {
        let mut queue = queue();
        queue.enqueue(&track("t1", "One"), &requester("u1"), Instant::now());

        assert!(!queue.preview_pair().is_complete());
        assert!(matches!(queue.commit_pair(), CommitOutcome::Unchanged(_)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn boost_moves_latest_entry_to_front() {
        let now = Instant::now();
        let mut queue = queue();
        queue.enqueue(&track("t1", "One"), &requester("u1"), now);
        queue.enqueue(&track("t2", "Two"), &requester("u2"), now);
        queue.enqueue(&track("t3", "Three"), &requester("u1"), now + Duration::from_secs(6));

        assert!(queue.boost("u1"));
        assert_eq!(ids(&queue), vec!["t3", "t1", "t2"]);
        // Already at the front.
        assert!(!queue.boost("u1"));
        assert!(!queue.boost("nobody"));
    }
}
