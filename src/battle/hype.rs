/// Upper bound of the meter.
pub const MAX_HYPE: u8 = 100;

/// Audience excitement in `0..=100`, raised by gifts and lowered by scheduled decays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hype {
    level: u8,
    min_gain: u8,
    max_gain: u8,
    decay: u8,
}

impl Hype {
    /// Empty meter with the given gain bounds and decay step.
    pub fn new(min_gain: u8, max_gain: u8, decay: u8) -> Self {
        Self {
            level: 0,
            min_gain: min_gain.min(max_gain),
            max_gain,
            decay,
        }
    }

    /// Current level.
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Gain granted by a gift of `value`: half its value, clamped to the per-gift bounds.
    pub fn gain_for(&self, value: u64) -> u8 {
        let half = u8::try_from(value / 2).unwrap_or(u8::MAX);
        half.clamp(self.min_gain, self.max_gain)
    }

    /// Apply a gift and return the level after it.
    pub fn apply_gift(&mut self, value: u64) -> u8 {
        self.level = self.level.saturating_add(self.gain_for(value)).min(MAX_HYPE);
        self.level
    }

    /// Apply one decay step and return the level after it.
    pub fn decay(&mut self) -> u8 {
        self.level = self.level.saturating_sub(self.decay);
        self.level
    }
}
