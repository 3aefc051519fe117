//! Shared application state
//!
//! One [`SharedState`] owns the engine components for the lifetime of the process; API
//! handlers reach it through the cheap-to-clone [`UnifiedAppState`].

use std::sync::Arc;
use tracing::info;

use crate::{
    characters::CharacterCatalog,
    config::Config,
    context_engine::ChatOrchestrator,
    identity::IdentityProvider,
    intimacy::IntimacyLedger,
    memory_db::{RecordStore, SessionStore},
    worker_threads::CompletionClient,
};

pub struct SharedState {
    /// Configuration (read-only after initialization)
    pub config: Arc<Config>,
    pub records: Arc<dyn RecordStore>,
    pub sessions: Arc<SessionStore>,
    pub ledger: Arc<IntimacyLedger>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub identity: Arc<dyn IdentityProvider>,
    pub characters: Arc<CharacterCatalog>,
}

impl SharedState {
    pub fn new(
        config: Config,
        records: Arc<dyn RecordStore>,
        client: Arc<dyn CompletionClient>,
        identity: Arc<dyn IdentityProvider>,
        characters: Arc<CharacterCatalog>,
    ) -> Self {
        info!("Initializing shared state");

        let sessions = Arc::new(SessionStore::new(records.clone(), config.session_store_config()));
        let ledger = Arc::new(IntimacyLedger::new(records.clone()));
        let orchestrator = Arc::new(ChatOrchestrator::new(
            sessions.clone(),
            ledger.clone(),
            client,
            config.orchestrator_config(),
        ));

        Self {
            config: Arc::new(config),
            records,
            sessions,
            ledger,
            orchestrator,
            identity,
            characters,
        }
    }
}

/// Router state handed to every handler.
#[derive(Clone)]
pub struct UnifiedAppState {
    pub shared_state: Arc<SharedState>,
}

impl UnifiedAppState {
    pub fn new(shared_state: Arc<SharedState>) -> Self {
        Self { shared_state }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.shared_state.sessions
    }

    pub fn ledger(&self) -> &IntimacyLedger {
        &self.shared_state.ledger
    }

    pub fn orchestrator(&self) -> &ChatOrchestrator {
        &self.shared_state.orchestrator
    }

    pub fn identity(&self) -> &dyn IdentityProvider {
        self.shared_state.identity.as_ref()
    }

    pub fn characters(&self) -> &CharacterCatalog {
        &self.shared_state.characters
    }
}
