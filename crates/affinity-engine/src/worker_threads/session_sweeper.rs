//! Background hygiene for the session store.
//!
//! Expiry is already enforced lazily on every read; the sweeper only reclaims storage held
//! by sessions nobody reads again, and drops per-session locks that went idle.

use crate::error::EngineResult;
use crate::memory_db::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct SessionSweeper {
    sessions: Arc<SessionStore>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(sessions: Arc<SessionStore>, interval: Duration) -> Self {
        Self { sessions, interval }
    }

    /// One pass: purge expired sessions, then prune idle locks.
    pub fn sweep_once(&self) -> EngineResult<usize> {
        let purged = self.sessions.purge_expired()?;
        let pruned = self.sessions.prune_locks();
        debug!("Sweep purged {} sessions, pruned {} idle locks", purged, pruned);
        Ok(purged)
    }

    /// Run forever on the tokio runtime. Store access happens on the blocking pool.
    pub fn spawn(self) -> JoinHandle<()> {
        info!("Session sweeper running every {:?}", self.interval);
        let sweeper = Arc::new(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pass = sweeper.clone();
                match tokio::task::spawn_blocking(move || pass.sweep_once()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("Session sweep failed: {}", e),
                    Err(e) => warn!("Session sweep task panicked: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::schema::Session;
    use crate::memory_db::{
        load_json, store_json, InMemoryRecordStore, Namespace, Precondition, RecordStore, SessionStoreConfig,
    };
    use chrono::Utc;

    fn expire(records: &InMemoryRecordStore, session_id: &str) {
        let (mut session, _) = load_json::<Session>(records, Namespace::Sessions, session_id)
            .unwrap()
            .unwrap();
        session.last_activity = Utc::now() - chrono::Duration::hours(25);
        store_json(records, Namespace::Sessions, session_id, &session, Precondition::Any).unwrap();
    }

    fn setup() -> (Arc<SessionStore>, Arc<InMemoryRecordStore>) {
        let records = Arc::new(InMemoryRecordStore::new());
        let sessions = Arc::new(SessionStore::new(records.clone(), SessionStoreConfig::default()));
        (sessions, records)
    }

    #[test]
    fn test_sweep_once_purges_only_expired() {
        let (sessions, records) = setup();
        let live = sessions.create("c1", "u1", None).unwrap();
        let stale = sessions.create("c1", "u1", None).unwrap();
        expire(&records, &stale);

        let sweeper = SessionSweeper::new(sessions.clone(), Duration::from_secs(3600));
        assert_eq!(sweeper.sweep_once().unwrap(), 1);
        assert_eq!(sweeper.sweep_once().unwrap(), 0);
        assert!(records.get(Namespace::Sessions, &stale).unwrap().is_none());
        assert!(sessions.get(&live).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_spawned_sweeper_runs_periodically() {
        let (sessions, records) = setup();
        let stale = sessions.create("c1", "u1", None).unwrap();
        expire(&records, &stale);

        let handle = SessionSweeper::new(sessions, Duration::from_millis(20)).spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert!(records.get(Namespace::Sessions, &stale).unwrap().is_none());
    }
}
