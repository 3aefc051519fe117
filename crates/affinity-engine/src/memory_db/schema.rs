//! Persisted record shapes and the SQLite schema backing the record store
use crate::memory::{Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message as stored inside a session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub character_id: Option<String>,
}

impl StoredMessage {
    pub fn new(role: Role, content: impl Into<String>, character_id: Option<&str>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            character_id: character_id.map(str::to_string),
        }
    }

    pub fn to_message(&self) -> Message {
        Message::new(self.role, self.content.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub character_id: String,
    pub user_id: String,
    /// Token the session was created under, kept only to tie the session to a login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    /// Reserved. Nothing computes or reads it yet.
    #[serde(default)]
    pub context_summary: String,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_activity) > timeout
    }

    pub fn has_assistant_turn(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::Assistant)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            character_id: self.character_id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            message_count: self.messages.len(),
            context_summary: self.context_summary.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub character_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub context_summary: String,
}

/// Owning user record; intimacy scores live nested under it as `{character_id: score}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub intimacy: BTreeMap<String, u64>,
}

/// Tables
pub const SCHEMA_SQL: &str = "
-- Versioned JSON documents, one row per (namespace, key)
CREATE TABLE IF NOT EXISTS records (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    version INTEGER NOT NULL,
    updated_at TIMESTAMP NOT NULL,
    PRIMARY KEY (namespace, key)
);
CREATE INDEX IF NOT EXISTS idx_records_namespace ON records (namespace);
";
