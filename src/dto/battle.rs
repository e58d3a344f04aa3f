use serde::Serialize;

use crate::battle::{
    queue::{Pair, QueueEntry},
    state_machine::Stage,
};

/// Observer view of the battle, published after every engine step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleSnapshot {
    /// Current stage.
    pub stage: Stage,
    /// Version of the current stage.
    pub stage_version: u64,
    /// Votes for A.
    pub votes_a: u32,
    /// Votes for B.
    pub votes_b: u32,
    /// Rounded share of A; 50 when nobody voted.
    pub percent_a: u8,
    /// Rounded share of B.
    pub percent_b: u8,
    /// Whether a voting window is open.
    pub voting: bool,
    /// Hype level.
    pub hype: u8,
    /// Whether the timer chain is frozen.
    pub paused: bool,
    /// Current contenders.
    pub pair: Pair,
    /// Last winner.
    pub winner: Option<QueueEntry>,
    /// Waiting entries in play order.
    pub queue: Vec<QueueEntry>,
}

/// Split of the vote as percentages summing to 100.
pub fn vote_percentages(votes_a: u32, votes_b: u32) -> (u8, u8) {
    let total = u64::from(votes_a) + u64::from(votes_b);
    if total == 0 {
        return (50, 50);
    }
    let a = ((u64::from(votes_a) * 100 + total / 2) / total) as u8;
    (a, 100 - a)
}
