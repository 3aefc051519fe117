pub mod llm_worker;
pub mod session_sweeper;
pub use llm_worker::{CompletionClient, CompletionRequest, LLMWorker, LlmError};
pub use session_sweeper::SessionSweeper;
