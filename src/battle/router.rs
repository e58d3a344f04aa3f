use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    battle::{playback::TrackQuery, queue::Requester},
    dto::event::{EventUser, NormalizedEvent},
};

const QUEUE_COMMAND: &str = "!battle";
const DEMO_COMMANDS: [&str; 2] = ["!pair", "!demo"];

/// Contender a vote goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    /// First contender.
    A,
    /// Second contender.
    B,
}

/// What a relayed event asks the battle to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Vote for one side.
    Vote {
        /// Voter key.
        user_id: String,
        /// Chosen contender.
        side: Side,
    },
    /// Track request for the queue.
    QueueAdd {
        /// What to look up.
        query: TrackQuery,
        /// Who asked.
        requester: Requester,
    },
    /// Request to seed the queue with demo tracks.
    DemoPair {
        /// Who asked.
        requester: Requester,
    },
    /// Gift feeding the hype meter.
    Gift {
        /// Sender key.
        user_id: String,
        /// Sender handle.
        username: String,
        /// Gift worth, at least 1.
        value: u64,
    },
}

/// Handle returned by [`CommandRouter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Classifies relayed events and fans the resulting intents out to subscribers.
#[derive(Debug, Default)]
pub struct CommandRouter {
    next_id: AtomicU64,
    subscribers: DashMap<SubscriptionId, mpsc::UnboundedSender<Intent>>,
}

impl CommandRouter {
    /// Router without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one consumer of intents.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Intent>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Stop delivering intents to `id`. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Number of registered consumers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Classify `event` and deliver the intent to every subscriber, dropping those whose
    /// receiver is gone. Returns the number of deliveries.
    pub fn dispatch(&self, event: &NormalizedEvent) -> usize {
        let Some(intent) = classify(event) else {
            return 0;
        };
        debug!(intent = ?intent, "routing intent");

        let mut delivered = 0;
        self.subscribers.retain(|_, tx| match tx.send(intent.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        delivered
    }
}

/// Map a relayed event to an intent. Unrecognised chat and non-chat, non-gift events yield
/// `None`.
pub fn classify(event: &NormalizedEvent) -> Option<Intent> {
    match event {
        NormalizedEvent::Chat(chat) => classify_chat(&chat.user, &chat.text),
        NormalizedEvent::Gift(gift) => Some(Intent::Gift {
            user_id: gift.user.voter_key().to_owned(),
            username: gift.user.username.clone(),
            value: gift.value.max(1),
        }),
        _ => None,
    }
}

fn classify_chat(user: &EventUser, text: &str) -> Option<Intent> {
    let original = text.trim();
    let lowered = original.to_lowercase();

    // Commands first so "!battle vote anthem" is a request, not a vote.
    if let Some(argument) = strip_command(original, QUEUE_COMMAND) {
        let argument = argument.trim();
        if argument.is_empty() {
            return None;
        }
        return Some(Intent::QueueAdd {
            query: TrackQuery::parse(argument),
            requester: requester_of(user),
        });
    }
    if lowered == "q" || DEMO_COMMANDS.iter().any(|command| lowered.starts_with(command)) {
        return Some(Intent::DemoPair {
            requester: requester_of(user),
        });
    }

    let side = if lowered == "a" || lowered == "!a" || lowered.contains("vote a") {
        Side::A
    } else if lowered == "b" || lowered == "!b" || lowered.contains("vote b") {
        Side::B
    } else {
        return None;
    };
    Some(Intent::Vote {
        user_id: user.voter_key().to_owned(),
        side,
    })
}

/// Case-insensitive prefix strip that keeps the rest of `text` in its original case.
fn strip_command<'a>(text: &'a str, command: &str) -> Option<&'a str> {
    let head = text.get(..command.len())?;
    head.eq_ignore_ascii_case(command)
        .then(|| &text[command.len()..])
}

fn requester_of(user: &EventUser) -> Requester {
    Requester {
        id: user.voter_key().to_owned(),
        display_name: user.display_name.clone(),
        username: user.username.clone(),
    }
}
