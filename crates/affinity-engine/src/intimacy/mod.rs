//! Relationship scoring between users and characters
pub mod levels;
pub mod ledger;

pub use levels::{level_of, progress, IntimacyLevel, LevelProgress, LEVEL_TABLE};
pub use ledger::{IncreaseOutcome, IntimacyLedger};
