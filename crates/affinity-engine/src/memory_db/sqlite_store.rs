use crate::error::EngineResult;
use crate::memory_db::schema::SCHEMA_SQL;
use crate::memory_db::{conflict, Namespace, Precondition, RecordStore, VersionedRecord};
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// SQLite-backed record store. Compare-and-swap runs inside `BEGIN IMMEDIATE`, so the
/// version check holds across processes sharing the database file.
pub struct SqliteRecordStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteRecordStore {
    pub fn new(db_path: &Path) -> EngineResult<Self> {
        info!("Opening record database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            );
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
            conn.execute_batch(SCHEMA_SQL)?;
        }
        info!("Record database initialized successfully");
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Single-connection pool: every `:memory:` connection would otherwise be its own database.
    pub fn new_in_memory() -> EngineResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(SCHEMA_SQL)?;
        }
        Ok(Self { pool: Arc::new(pool) })
    }

    fn get_conn(&self) -> EngineResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn record_count(&self, namespace: Namespace) -> EngineResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE namespace = ?1",
            [namespace.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, namespace: Namespace, key: &str) -> EngineResult<Option<VersionedRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                "SELECT value, version FROM records WHERE namespace = ?1 AND key = ?2",
                params![namespace.as_str(), key],
                |row| {
                    Ok(VersionedRecord {
                        value: row.get(0)?,
                        version: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn put(&self, namespace: Namespace, key: &str, value: &str, precondition: Precondition) -> EngineResult<u64> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM records WHERE namespace = ?1 AND key = ?2",
                params![namespace.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.map(|v| v as u64);

        if !precondition.check(current) {
            return Err(conflict(namespace, key, precondition));
        }

        let version = current.map_or(1, |v| v + 1);
        tx.execute(
            "INSERT INTO records (namespace, key, value, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                version = excluded.version,
                updated_at = excluded.updated_at",
            params![namespace.as_str(), key, value, version as i64, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        debug!("Wrote {}/{} at version {}", namespace, key, version);
        Ok(version)
    }

    fn delete(&self, namespace: Namespace, key: &str) -> EngineResult<bool> {
        let conn = self.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM records WHERE namespace = ?1 AND key = ?2",
            params![namespace.as_str(), key],
        )?;
        Ok(deleted > 0)
    }

    fn scan(&self, namespace: Namespace) -> EngineResult<Vec<(String, VersionedRecord)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, value, version FROM records WHERE namespace = ?1"
        )?;
        let mut rows = stmt.query([namespace.as_str()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push((
                row.get(0)?,
                VersionedRecord {
                    value: row.get(1)?,
                    version: row.get::<_, i64>(2)? as u64,
                },
            ));
        }
        Ok(records)
    }
}

impl Drop for SqliteRecordStore {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("affinity.db");

        {
            let store = SqliteRecordStore::new(&path).unwrap();
            store.put(Namespace::Users, "u1", r#"{"id":"u1"}"#, Precondition::Absent).unwrap();
        }

        let reopened = SqliteRecordStore::new(&path).unwrap();
        let record = reopened.get(Namespace::Users, "u1").unwrap().unwrap();
        assert_eq!(record.value, r#"{"id":"u1"}"#);
        assert_eq!(record.version, 1);
    }

    #[test]
    fn test_compare_and_swap() {
        let store = SqliteRecordStore::new_in_memory().unwrap();
        store.put(Namespace::Sessions, "s1", "v1", Precondition::Absent).unwrap();

        let err = store.put(Namespace::Sessions, "s1", "again", Precondition::Absent).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        assert_eq!(store.put(Namespace::Sessions, "s1", "v2", Precondition::Version(1)).unwrap(), 2);
        let err = store.put(Namespace::Sessions, "s1", "v3", Precondition::Version(1)).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(store.get(Namespace::Sessions, "s1").unwrap().unwrap().value, "v2");
    }

    #[test]
    fn test_scan_and_delete() {
        let store = SqliteRecordStore::new_in_memory().unwrap();
        store.put(Namespace::Sessions, "a", "1", Precondition::Any).unwrap();
        store.put(Namespace::Sessions, "b", "2", Precondition::Any).unwrap();
        store.put(Namespace::Users, "u", "3", Precondition::Any).unwrap();

        let mut keys: Vec<String> = store.scan(Namespace::Sessions).unwrap().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(store.delete(Namespace::Sessions, "a").unwrap());
        assert!(!store.delete(Namespace::Sessions, "a").unwrap());
        assert_eq!(store.record_count(Namespace::Sessions).unwrap(), 1);
    }
}
