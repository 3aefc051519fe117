//! Intimacy ledger: monotonic per (user, character) scores.
//!
//! Scores are nested inside the user's record (`intimacy: {character_id: score}`), so the
//! read-modify-write runs under a lock keyed by user id and is guarded by the record's
//! version.

use crate::error::EngineResult;
use crate::intimacy::levels::{level_of, IntimacyLevel};
use crate::locks::KeyedLocks;
use crate::memory_db::schema::UserRecord;
use crate::memory_db::{load_json, store_json, Namespace, Precondition, RecordStore};
use crate::metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncreaseOutcome {
    pub new_score: u64,
    pub old_level: IntimacyLevel,
    pub new_level: IntimacyLevel,
    pub level_up: bool,
}

pub struct IntimacyLedger {
    store: Arc<dyn RecordStore>,
    locks: KeyedLocks,
}

impl IntimacyLedger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Current score, 0 when absent. Storage failures degrade to 0.
    pub fn get(&self, user_id: &str, character_id: &str) -> u64 {
        match self.get_all(user_id) {
            Ok(scores) => scores.get(character_id).copied().unwrap_or(0),
            Err(e) => {
                warn!("Failed to read intimacy for {}/{}: {}", user_id, character_id, e);
                0
            }
        }
    }

    /// All scores of a user keyed by character id.
    pub fn get_all(&self, user_id: &str) -> EngineResult<BTreeMap<String, u64>> {
        Ok(load_json::<UserRecord>(self.store.as_ref(), Namespace::Users, user_id)?
            .map(|(record, _)| record.intimacy)
            .unwrap_or_default())
    }

    /// Add one point. Creates the user record on first use.
    pub fn increase(&self, user_id: &str, character_id: &str) -> EngineResult<IncreaseOutcome> {
        let outcome = self.update(user_id, |record| {
            let score = record.intimacy.entry(character_id.to_string()).or_insert(0);
            let old_level = level_of(*score);
            *score = score.saturating_add(1);
            let new_level = level_of(*score);
            IncreaseOutcome {
                new_score: *score,
                old_level,
                new_level,
                level_up: new_level != old_level,
            }
        })?;

        if outcome.level_up {
            metrics::inc_level_ups();
            info!(
                "User {} reached {} with character {} (score {})",
                user_id, outcome.new_level, character_id, outcome.new_score
            );
        } else {
            debug!("Intimacy {}/{} -> {}", user_id, character_id, outcome.new_score);
        }
        Ok(outcome)
    }

    /// Drop every score of a user. Returns how many characters had one.
    pub fn clear_user(&self, user_id: &str) -> EngineResult<usize> {
        let cleared = self.update(user_id, |record| {
            let count = record.intimacy.len();
            record.intimacy.clear();
            count
        })?;
        info!("Cleared {} intimacy records for user {}", cleared, user_id);
        Ok(cleared)
    }

    fn update<R>(&self, user_id: &str, mut f: impl FnMut(&mut UserRecord) -> R) -> EngineResult<R> {
        self.locks.with_lock(user_id, || {
            let mut retried = false;
            loop {
                let (mut record, precondition) =
                    match load_json::<UserRecord>(self.store.as_ref(), Namespace::Users, user_id)? {
                        Some((record, version)) => (record, Precondition::Version(version)),
                        None => (
                            UserRecord {
                                id: user_id.to_string(),
                                ..Default::default()
                            },
                            Precondition::Absent,
                        ),
                    };
                let out = f(&mut record);
                match store_json(self.store.as_ref(), Namespace::Users, user_id, &record, precondition) {
                    Ok(_) => return Ok(out),
                    Err(e) if e.is_conflict() && !retried => {
                        warn!("Version conflict on user {}, retrying", user_id);
                        retried = true;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}
