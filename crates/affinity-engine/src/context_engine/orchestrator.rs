//! Chat turn orchestration: session resolution, context building, the completion call
//! with retries, reply persistence and intimacy accounting.

use crate::context_engine::context_builder::ContextBuilder;
use crate::context_engine::prompt_policy::PROACTIVE_GREETING_CUE;
use crate::error::EngineError;
use crate::intimacy::{IncreaseOutcome, IntimacyLedger};
use crate::memory::{Message, Role};
use crate::memory_db::SessionStore;
use crate::metrics;
use crate::worker_threads::{CompletionClient, CompletionRequest, LlmError};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("invalid chat request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Extra attempts after the first failed completion call.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_backoff: Duration,
    pub intimacy_per_turn: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            intimacy_per_turn: true,
        }
    }
}

/// One inbound chat turn.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    pub user_id: String,
    /// Whether `user_id` came from a verified token. Guests never earn intimacy.
    pub authenticated: bool,
    pub auth_token: Option<String>,
    pub character_id: String,
    /// Continue this session; a new one is created when absent.
    pub session_id: Option<String>,
    pub message: String,
    /// Required; the API fills it from the character catalog when the character is listed.
    pub character_name: Option<String>,
    pub character_description: Option<String>,
    /// The character opens the conversation; `message` is ignored and nothing is stored
    /// for the user side.
    pub proactive_greeting: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub content: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intimacy: Option<IncreaseOutcome>,
}

pub struct ChatOrchestrator {
    sessions: Arc<SessionStore>,
    ledger: Arc<IntimacyLedger>,
    builder: ContextBuilder,
    client: Arc<dyn CompletionClient>,
    config: OrchestratorConfig,
}

impl ChatOrchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        ledger: Arc<IntimacyLedger>,
        client: Arc<dyn CompletionClient>,
        config: OrchestratorConfig,
    ) -> Self {
        let builder = ContextBuilder::new(sessions.clone(), ledger.clone());
        info!("Chat orchestrator initialized (model {})", config.model);
        Self {
            sessions,
            ledger,
            builder,
            client,
            config,
        }
    }

    pub fn context_builder(&self) -> &ContextBuilder {
        &self.builder
    }

    pub async fn chat_turn(&self, turn: ChatTurn) -> Result<ChatReply, ChatError> {
        let user_message = turn.message.trim();
        if user_message.is_empty() && !turn.proactive_greeting {
            return Err(ChatError::InvalidRequest("message must not be empty".into()));
        }

        if turn.character_name.as_deref().map_or(true, |name| name.trim().is_empty()) {
            return Err(ChatError::InvalidRequest(format!(
                "no character name given or configured for {}",
                turn.character_id
            )));
        }

        let session_id = self.resolve_session(&turn)?;

        if !turn.proactive_greeting
            && !self
                .sessions
                .append(&session_id, Role::User, user_message, Some(&turn.character_id))?
        {
            return Err(EngineError::NotFound(format!("session {}", session_id)).into());
        }

        let mut messages = self.builder.build(
            &session_id,
            turn.character_name.as_deref(),
            turn.character_description.as_deref(),
        )?;
        if turn.proactive_greeting {
            messages.push(Message::user(PROACTIVE_GREETING_CUE));
        }

        let content = self.complete_with_retry(messages).await?;

        if !self
            .sessions
            .append(&session_id, Role::Assistant, &content, Some(&turn.character_id))?
        {
            warn!("Session {} disappeared before the reply could be stored", session_id);
        }

        let qualifies = turn.authenticated
            && self.config.intimacy_per_turn
            && !turn.proactive_greeting
            && !user_message.is_empty();
        let intimacy = if qualifies {
            match self.ledger.increase(&turn.user_id, &turn.character_id) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(
                        "Failed to increase intimacy for {}/{}: {}",
                        turn.user_id, turn.character_id, e
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(ChatReply {
            content,
            session_id,
            intimacy,
        })
    }

    /// A given session must belong to the turn's user and character.
    fn resolve_session(&self, turn: &ChatTurn) -> Result<String, ChatError> {
        match &turn.session_id {
            Some(id) => match self.sessions.get(id)? {
                Some(session) if session.user_id != turn.user_id => {
                    warn!("User {} tried to continue session {} of another user", turn.user_id, id);
                    Err(EngineError::NotFound(format!("session {}", id)).into())
                }
                Some(session) if session.character_id != turn.character_id => Err(ChatError::InvalidRequest(format!(
                    "session {} belongs to character {}, not {}",
                    id, session.character_id, turn.character_id
                ))),
                Some(_) => Ok(id.clone()),
                None => Err(EngineError::NotFound(format!("session {}", id)).into()),
            },
            None => Ok(self.sessions.create(
                &turn.character_id,
                &turn.user_id,
                turn.auth_token.as_deref(),
            )?),
        }
    }

    async fn complete_with_retry(&self, messages: Vec<Message>) -> Result<String, LlmError> {
        let request = CompletionRequest {
            messages,
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            match self.client.complete(request.clone()).await {
                Ok(content) => {
                    metrics::observe_llm_latency(started.elapsed().as_secs_f64());
                    debug!("Completion succeeded after {} attempt(s)", attempt + 1);
                    return Ok(content);
                }
                Err(e) => {
                    metrics::inc_llm_failures();
                    if e.is_retryable() && attempt < self.config.max_retries {
                        let delay = self.config.retry_backoff * 2u32.saturating_pow(attempt);
                        warn!("Completion attempt {} failed ({}), retrying in {:?}", attempt + 1, e, delay);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    } else {
                        error!("Completion failed after {} attempt(s): {}", attempt + 1, e);
                        return Err(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intimacy::IntimacyLevel;
    use crate::memory_db::{InMemoryRecordStore, RecordStore, SessionStoreConfig};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted results and records every request.
    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_request(&self) -> CompletionRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("...".to_string()))
        }
    }

    fn setup(client: Arc<ScriptedClient>) -> (ChatOrchestrator, Arc<SessionStore>, Arc<IntimacyLedger>) {
        let records: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let sessions = Arc::new(SessionStore::new(records.clone(), SessionStoreConfig::default()));
        let ledger = Arc::new(IntimacyLedger::new(records));
        let config = OrchestratorConfig {
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let orchestrator = ChatOrchestrator::new(sessions.clone(), ledger.clone(), client, config);
        (orchestrator, sessions, ledger)
    }

    fn turn(message: &str) -> ChatTurn {
        ChatTurn {
            user_id: "u1".into(),
            authenticated: true,
            character_id: "c1".into(),
            message: message.into(),
            character_name: Some("Ada".into()),
            character_description: Some("A poet.".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_turn_persists_both_sides_and_scores() {
        let client = ScriptedClient::new(vec![Ok("Good day.".into())]);
        let (orchestrator, sessions, ledger) = setup(client.clone());

        let reply = orchestrator.chat_turn(turn("hi")).await.unwrap();
        assert_eq!(reply.content, "Good day.");
        let outcome = reply.intimacy.unwrap();
        assert_eq!(outcome.new_score, 1);
        assert_eq!(outcome.new_level, IntimacyLevel::FirstAcquaintance);
        assert_eq!(ledger.get("u1", "c1"), 1);

        let request = client.last_request();
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.contains("stranger"));
        assert_eq!(request.messages.last().unwrap(), &Message::user("hi"));

        let session = sessions.get(&reply.session_id).unwrap().unwrap();
        let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried() {
        let client = ScriptedClient::new(vec![
            Err(LlmError::Transport("reset".into())),
            Err(LlmError::Status { status: 502, body: String::new() }),
            Ok("finally".into()),
        ]);
        let (orchestrator, _, _) = setup(client.clone());

        let reply = orchestrator.chat_turn(turn("hi")).await.unwrap();
        assert_eq!(reply.content, "finally");
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_completion_stores_no_reply() {
        let client = ScriptedClient::new(vec![Err(LlmError::Status { status: 400, body: "bad".into() })]);
        let (orchestrator, sessions, ledger) = setup(client.clone());
        let session_id = sessions.create("c1", "u1", None).unwrap();

        let err = orchestrator
            .chat_turn(ChatTurn {
                session_id: Some(session_id.clone()),
                ..turn("hi")
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Llm(LlmError::Status { status: 400, .. })));
        assert_eq!(client.calls(), 1);
        let session = sessions.get(&session_id).unwrap().unwrap();
        assert!(!session.has_assistant_turn());
        assert_eq!(ledger.get("u1", "c1"), 0);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let client = ScriptedClient::new(vec![
            Err(LlmError::Transport("a".into())),
            Err(LlmError::Transport("b".into())),
            Err(LlmError::Transport("c".into())),
            Ok("too late".into()),
        ]);
        let (orchestrator, _, _) = setup(client.clone());

        assert!(orchestrator.chat_turn(turn("hi")).await.is_err());
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_guests_and_greetings_do_not_score() {
        let client = ScriptedClient::new(vec![]);
        let (orchestrator, sessions, ledger) = setup(client.clone());

        let guest = orchestrator
            .chat_turn(ChatTurn {
                user_id: "anonymous".into(),
                authenticated: false,
                ..turn("hi")
            })
            .await
            .unwrap();
        assert!(guest.intimacy.is_none());

        let greeting = orchestrator
            .chat_turn(ChatTurn {
                proactive_greeting: true,
                ..turn("")
            })
            .await
            .unwrap();
        assert!(greeting.intimacy.is_none());
        assert_eq!(ledger.get("u1", "c1"), 0);

        assert_eq!(client.last_request().messages.last().unwrap(), &Message::user(PROACTIVE_GREETING_CUE));
        let stored = sessions.get(&greeting.session_id).unwrap().unwrap();
        assert!(stored.messages.iter().all(|m| m.content != PROACTIVE_GREETING_CUE));
        assert!(stored.messages.iter().all(|m| m.role != Role::User));
    }

    #[tokio::test]
    async fn test_unknown_session_and_empty_message_are_rejected() {
        let client = ScriptedClient::new(vec![]);
        let (orchestrator, _, _) = setup(client.clone());

        let err = orchestrator
            .chat_turn(ChatTurn {
                session_id: Some("missing".into()),
                ..turn("hi")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Engine(EngineError::NotFound(_))));

        let err = orchestrator.chat_turn(turn("   ")).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_session_of_another_user_or_character_is_rejected() {
        let client = ScriptedClient::new(vec![]);
        let (orchestrator, sessions, ledger) = setup(client.clone());
        let guest_session = sessions.create("c1", "anonymous", None).unwrap();
        let other_character = sessions.create("c2", "u1", None).unwrap();

        let err = orchestrator
            .chat_turn(ChatTurn {
                session_id: Some(guest_session.clone()),
                ..turn("hi")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Engine(EngineError::NotFound(_))));

        let err = orchestrator
            .chat_turn(ChatTurn {
                session_id: Some(other_character.clone()),
                ..turn("hi")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));

        assert_eq!(client.calls(), 0);
        assert_eq!(ledger.get("u1", "c1"), 0);
        assert!(sessions.get(&guest_session).unwrap().unwrap().messages.is_empty());
        assert!(sessions.get(&other_character).unwrap().unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_prompt_level_follows_the_scored_pair() {
        let client = ScriptedClient::new(vec![]);
        let (orchestrator, _, ledger) = setup(client.clone());

        let first = orchestrator.chat_turn(turn("hello")).await.unwrap();
        for i in 0..5 {
            orchestrator
                .chat_turn(ChatTurn {
                    session_id: Some(first.session_id.clone()),
                    ..turn(&format!("turn {}", i))
                })
                .await
                .unwrap();
        }

        assert_eq!(ledger.get("u1", "c1"), 6);
        let system = &client.last_request().messages[0];
        assert!(system.content.contains("[Relationship level: warming-up]"));
    }

    #[tokio::test]
    async fn test_missing_character_name_is_rejected() {
        let client = ScriptedClient::new(vec![]);
        let (orchestrator, _, _) = setup(client.clone());

        let err = orchestrator
            .chat_turn(ChatTurn {
                character_name: None,
                ..turn("hi")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));
        assert_eq!(client.calls(), 0);
    }
}
