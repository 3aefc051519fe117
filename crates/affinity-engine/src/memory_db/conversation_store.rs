//! Session store: lifecycle, lazy expiry and bounded history for chat sessions.
//!
//! Every session is one JSON document in the `sessions` namespace. Mutations load the
//! document, change it and write it back with a version precondition while holding the
//! per-session lock; a version conflict (another process sharing the database) is retried
//! once before it surfaces.

use crate::error::EngineResult;
use crate::locks::KeyedLocks;
use crate::memory::Role;
use crate::memory_db::retention::apply_retention;
use crate::memory_db::schema::{Session, SessionSummary, StoredMessage};
use crate::memory_db::{load_json, store_json, Namespace, Precondition, RecordStore};
use crate::metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Retention cap applied after every append.
    pub max_messages: usize,
    /// Inactivity after which a session counts as gone.
    pub timeout: chrono::Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            timeout: chrono::Duration::hours(24),
        }
    }
}

pub struct SessionStore {
    store: Arc<dyn RecordStore>,
    locks: KeyedLocks,
    config: SessionStoreConfig,
}

impl SessionStore {
    pub fn new(store: Arc<dyn RecordStore>, config: SessionStoreConfig) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    pub fn create(&self, character_id: &str, user_id: &str, auth_token: Option<&str>) -> EngineResult<String> {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            id: session_id.clone(),
            character_id: character_id.to_string(),
            user_id: user_id.to_string(),
            user_token: auth_token.map(str::to_string),
            created_at: now,
            last_activity: now,
            messages: Vec::new(),
            context_summary: String::new(),
        };

        store_json(self.store.as_ref(), Namespace::Sessions, &session_id, &session, Precondition::Absent)?;
        metrics::inc_sessions_created();
        info!("Created session {} for user {} / character {}", session_id, user_id, character_id);
        Ok(session_id)
    }

    /// Pure read; does not refresh `last_activity`.
    pub fn get(&self, session_id: &str) -> EngineResult<Option<Session>> {
        Ok(self.load_live(session_id)?.map(|(session, _)| session))
    }

    /// Append a message. Returns `false` when the session is missing or expired.
    pub fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        character_id: Option<&str>,
    ) -> EngineResult<bool> {
        let cap = self.config.max_messages;
        let trimmed = self.update(session_id, |session| {
            session.messages.push(StoredMessage::new(role, content, character_id));
            session.last_activity = Utc::now();
            apply_retention(&mut session.messages, cap)
        })?;

        match trimmed {
            Some(0) => Ok(true),
            Some(count) => {
                debug!("Trimmed {} messages from session {}", count, session_id);
                metrics::add_messages_trimmed(count);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Empty the history but keep the session.
    pub fn clear(&self, session_id: &str) -> EngineResult<bool> {
        let cleared = self.update(session_id, |session| {
            session.messages.clear();
            session.last_activity = Utc::now();
        })?;
        if cleared.is_some() {
            info!("Cleared history of session {}", session_id);
        }
        Ok(cleared.is_some())
    }

    pub fn delete(&self, session_id: &str) -> EngineResult<bool> {
        self.locks.with_lock(session_id, || {
            if self.load_live(session_id)?.is_none() {
                return Ok(false);
            }
            let deleted = self.store.delete(Namespace::Sessions, session_id)?;
            if deleted {
                info!("Deleted session {}", session_id);
            }
            Ok(deleted)
        })
    }

    /// Replace the content of the first system message, or insert one at the front.
    ///
    /// An insert re-applies retention so the history stays within the cap. Leaves
    /// `last_activity` alone. Returns the updated session, or `None` when it is missing or
    /// expired.
    pub fn upsert_system_message(&self, session_id: &str, content: &str) -> EngineResult<Option<Session>> {
        let cap = self.config.max_messages;
        let updated = self.update(session_id, |session| {
            let trimmed = match session.messages.iter().position(|m| m.role == Role::System) {
                Some(index) => {
                    session.messages[index].content = content.to_string();
                    0
                }
                None => {
                    let message = StoredMessage::new(Role::System, content, Some(&session.character_id));
                    session.messages.insert(0, message);
                    apply_retention(&mut session.messages, cap)
                }
            };
            (trimmed, session.clone())
        })?;

        Ok(updated.map(|(trimmed, session)| {
            if trimmed > 0 {
                debug!("Trimmed {} messages from session {} to fit its system message", trimmed, session_id);
                metrics::add_messages_trimmed(trimmed);
            }
            session
        }))
    }

    /// Live sessions of a user, most recently active first.
    pub fn list_for_user(&self, user_id: &str, character_id: Option<&str>) -> EngineResult<Vec<SessionSummary>> {
        let now = Utc::now();
        let mut sessions: Vec<Session> = self
            .scan_sessions()?
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .filter(|s| character_id.map_or(true, |c| s.character_id == c))
            .filter(|s| !s.is_expired(now, self.config.timeout))
            .collect();

        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions.iter().map(Session::summary).collect())
    }

    pub fn latest_for(&self, user_id: &str, character_id: &str) -> EngineResult<Option<String>> {
        Ok(self
            .list_for_user(user_id, Some(character_id))?
            .into_iter()
            .next()
            .map(|summary| summary.session_id))
    }

    /// Delete every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> EngineResult<usize> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .scan_sessions()?
            .into_iter()
            .filter(|s| s.is_expired(now, self.config.timeout))
            .map(|s| s.id)
            .collect();

        let mut purged = 0;
        for session_id in expired {
            // Re-checked under the lock; an append may have revived it meanwhile.
            if self.locks.with_lock(&session_id, || self.load_live(&session_id))?.is_none() {
                purged += 1;
            }
        }
        if purged > 0 {
            info!("Purged {} expired sessions", purged);
        }
        Ok(purged)
    }

    /// Delete all sessions owned by `user_id`, expired or not.
    pub fn delete_all_for_user(&self, user_id: &str) -> EngineResult<usize> {
        let owned: Vec<String> = self
            .scan_sessions()?
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();

        let mut deleted = 0;
        for session_id in owned {
            if self.locks.with_lock(&session_id, || self.store.delete(Namespace::Sessions, &session_id))? {
                deleted += 1;
            }
        }
        info!("Deleted {} sessions for user {}", deleted, user_id);
        Ok(deleted)
    }

    pub fn prune_locks(&self) -> usize {
        self.locks.prune_idle()
    }

    /// Load a session, treating an expired one as absent and removing it.
    fn load_live(&self, session_id: &str) -> EngineResult<Option<(Session, u64)>> {
        let Some((session, version)) = load_json::<Session>(self.store.as_ref(), Namespace::Sessions, session_id)?
        else {
            return Ok(None);
        };

        if self.is_expired(&session, Utc::now()) {
            info!("Session {} expired (last activity {})", session_id, session.last_activity);
            if let Err(e) = self.store.delete(Namespace::Sessions, session_id) {
                warn!("Failed to remove expired session {}: {}", session_id, e);
            }
            return Ok(None);
        }
        Ok(Some((session, version)))
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.is_expired(now, self.config.timeout)
    }

    /// Locked read-modify-write. `None` when the session is missing or expired.
    fn update<R>(&self, session_id: &str, mut f: impl FnMut(&mut Session) -> R) -> EngineResult<Option<R>> {
        self.locks.with_lock(session_id, || {
            let mut retried = false;
            loop {
                let Some((mut session, version)) = self.load_live(session_id)? else {
                    return Ok(None);
                };
                let out = f(&mut session);
                match store_json(
                    self.store.as_ref(),
                    Namespace::Sessions,
                    session_id,
                    &session,
                    Precondition::Version(version),
                ) {
                    Ok(_) => return Ok(Some(out)),
                    Err(e) if e.is_conflict() && !retried => {
                        warn!("Version conflict on session {}, retrying", session_id);
                        retried = true;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }

    fn scan_sessions(&self) -> EngineResult<Vec<Session>> {
        let mut sessions = Vec::new();
        for (key, record) in self.store.scan(Namespace::Sessions)? {
            match serde_json::from_str::<Session>(&record.value) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!("Skipping unreadable session record {}: {}", key, e),
            }
        }
        Ok(sessions)
    }
}
