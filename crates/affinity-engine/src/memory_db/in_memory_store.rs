use crate::error::EngineResult;
use crate::memory_db::{conflict, Namespace, Precondition, RecordStore, VersionedRecord};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Process-local record store. Used for tests and `STORAGE_BACKEND=memory`.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<DashMap<(Namespace, String), VersionedRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get(&self, namespace: Namespace, key: &str) -> EngineResult<Option<VersionedRecord>> {
        Ok(self
            .records
            .get(&(namespace, key.to_string()))
            .map(|record| record.value().clone()))
    }

    fn put(&self, namespace: Namespace, key: &str, value: &str, precondition: Precondition) -> EngineResult<u64> {
        match self.records.entry((namespace, key.to_string())) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().version;
                if !precondition.check(Some(current)) {
                    return Err(conflict(namespace, key, precondition));
                }
                let version = current + 1;
                entry.insert(VersionedRecord { value: value.to_string(), version });
                Ok(version)
            }
            Entry::Vacant(entry) => {
                if !precondition.check(None) {
                    return Err(conflict(namespace, key, precondition));
                }
                entry.insert(VersionedRecord { value: value.to_string(), version: 1 });
                Ok(1)
            }
        }
    }

    fn delete(&self, namespace: Namespace, key: &str) -> EngineResult<bool> {
        Ok(self.records.remove(&(namespace, key.to_string())).is_some())
    }

    fn scan(&self, namespace: Namespace) -> EngineResult<Vec<(String, VersionedRecord)>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect())
    }
}
