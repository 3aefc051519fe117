//! Intimacy level table and score-to-level mapping

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntimacyLevel {
    Stranger,
    FirstAcquaintance,
    WarmingUp,
    FastFriends,
    CloseFriends,
    KindredSpirit,
    Soulmate,
}

/// Thresholds in ascending order. A score belongs to the last entry whose threshold it reaches.
pub const LEVEL_TABLE: [(u64, IntimacyLevel); 7] = [
    (0, IntimacyLevel::Stranger),
    (1, IntimacyLevel::FirstAcquaintance),
    (5, IntimacyLevel::WarmingUp),
    (10, IntimacyLevel::FastFriends),
    (20, IntimacyLevel::CloseFriends),
    (50, IntimacyLevel::KindredSpirit),
    (100, IntimacyLevel::Soulmate),
];

impl IntimacyLevel {
    pub const ALL: [IntimacyLevel; 7] = [
        IntimacyLevel::Stranger,
        IntimacyLevel::FirstAcquaintance,
        IntimacyLevel::WarmingUp,
        IntimacyLevel::FastFriends,
        IntimacyLevel::CloseFriends,
        IntimacyLevel::KindredSpirit,
        IntimacyLevel::Soulmate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntimacyLevel::Stranger => "stranger",
            IntimacyLevel::FirstAcquaintance => "first-acquaintance",
            IntimacyLevel::WarmingUp => "warming-up",
            IntimacyLevel::FastFriends => "fast-friends",
            IntimacyLevel::CloseFriends => "close-friends",
            IntimacyLevel::KindredSpirit => "kindred-spirit",
            IntimacyLevel::Soulmate => "soulmate",
        }
    }

    pub fn threshold(&self) -> u64 {
        LEVEL_TABLE[self.index()].0
    }

    pub fn next(&self) -> Option<IntimacyLevel> {
        LEVEL_TABLE.get(self.index() + 1).map(|(_, level)| *level)
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for IntimacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn level_of(score: u64) -> IntimacyLevel {
    LEVEL_TABLE
        .iter()
        .rev()
        .find(|(threshold, _)| score >= *threshold)
        .map(|(_, level)| *level)
        .unwrap_or(IntimacyLevel::Stranger)
}

/// Position of a score between its level's threshold and the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub current_level: IntimacyLevel,
    pub next_level: Option<IntimacyLevel>,
    pub current_threshold: u64,
    pub next_threshold: Option<u64>,
    pub percent: f64,
}

pub fn progress(score: u64) -> LevelProgress {
    let current_level = level_of(score);
    let current_threshold = current_level.threshold();
    let next_level = current_level.next();
    let next_threshold = next_level.map(|level| level.threshold());

    let percent = match next_threshold {
        Some(next) => (score - current_threshold) as f64 / (next - current_threshold) as f64 * 100.0,
        None => 100.0,
    };

    LevelProgress {
        current_level,
        next_level,
        current_threshold,
        next_threshold,
        percent,
    }
}
