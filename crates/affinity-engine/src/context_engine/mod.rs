//! Context engine module - turns sessions and relationship state into completion requests

pub mod prompt_policy;
pub mod context_builder;
pub mod orchestrator;

pub use prompt_policy::{policy, PromptPolicy, PROACTIVE_GREETING_CUE};
pub use context_builder::{compose_system_prompt, CharacterProfile, ContextBuilder};
pub use orchestrator::{ChatError, ChatOrchestrator, ChatReply, ChatTurn, OrchestratorConfig};
