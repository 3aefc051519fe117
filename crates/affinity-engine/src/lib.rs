pub mod characters;
pub mod config;
pub mod context_engine;
pub mod error;
pub mod identity;
pub mod intimacy;
pub mod locks;
pub mod memory;
pub mod memory_db;
pub mod metrics;
pub mod shared_state;
pub mod telemetry;
pub mod worker_threads;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod server;

// Public API exports
pub use characters::{CharacterCatalog, CharacterConfig};
pub use config::Config;
pub use context_engine::{policy, ChatError, ChatOrchestrator, ChatReply, ChatTurn, ContextBuilder, PromptPolicy};
pub use error::{EngineError, EngineResult};
pub use identity::{IdentityProvider, StaticTokenProvider};
pub use intimacy::{level_of, progress, IncreaseOutcome, IntimacyLedger, IntimacyLevel, LevelProgress};
pub use memory::{Message, Role};
pub use memory_db::{InMemoryRecordStore, RecordStore, Session, SessionStore, SessionStoreConfig, SqliteRecordStore};
pub use worker_threads::{CompletionClient, CompletionRequest, LLMWorker, LlmError};

#[cfg(feature = "cli")]
pub use server::{build_router, run_server};
