//! Memory database module - versioned key-value storage for sessions and user records
pub mod schema;
pub mod in_memory_store;
pub mod sqlite_store;
pub mod retention;
pub mod conversation_store;
pub use schema::*;
pub use in_memory_store::InMemoryRecordStore;
pub use sqlite_store::SqliteRecordStore;
pub use conversation_store::{SessionStore, SessionStoreConfig};
use crate::error::{EngineError, EngineResult};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Sessions,
    Users,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Sessions => "sessions",
            Namespace::Users => "users",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw JSON document plus the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    pub value: String,
    pub version: u64,
}

/// Condition a write must satisfy against the currently stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional upsert.
    Any,
    /// The key must not exist yet.
    Absent,
    /// The key must still be at this version.
    Version(u64),
}

impl Precondition {
    /// Check against the stored version (`None` when the key is absent).
    pub fn check(&self, current: Option<u64>) -> bool {
        match (self, current) {
            (Precondition::Any, _) => true,
            (Precondition::Absent, None) => true,
            (Precondition::Absent, Some(_)) => false,
            (Precondition::Version(expected), Some(actual)) => *expected == actual,
            (Precondition::Version(_), None) => false,
        }
    }
}

/// Durable key-value store the engine persists into.
///
/// Implementations fail a `put` whose precondition does not hold with
/// [`EngineError::Conflict`], which is what callers rely on for optimistic updates.
pub trait RecordStore: Send + Sync {
    fn get(&self, namespace: Namespace, key: &str) -> EngineResult<Option<VersionedRecord>>;
    /// Returns the new version.
    fn put(&self, namespace: Namespace, key: &str, value: &str, precondition: Precondition) -> EngineResult<u64>;
    fn delete(&self, namespace: Namespace, key: &str) -> EngineResult<bool>;
    fn scan(&self, namespace: Namespace) -> EngineResult<Vec<(String, VersionedRecord)>>;
}

/// Load and decode a JSON document.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn RecordStore,
    namespace: Namespace,
    key: &str,
) -> EngineResult<Option<(T, u64)>> {
    match store.get(namespace, key)? {
        Some(record) => {
            let value = serde_json::from_str(&record.value)?;
            Ok(Some((value, record.version)))
        }
        None => Ok(None),
    }
}

/// Encode and write a JSON document.
pub fn store_json<T: Serialize>(
    store: &dyn RecordStore,
    namespace: Namespace,
    key: &str,
    value: &T,
    precondition: Precondition,
) -> EngineResult<u64> {
    let json = serde_json::to_string(value)?;
    store.put(namespace, key, &json, precondition)
}

pub(crate) fn conflict(namespace: Namespace, key: &str, precondition: Precondition) -> EngineError {
    EngineError::Conflict(format!("{}/{} did not satisfy {:?}", namespace, key, precondition))
}
