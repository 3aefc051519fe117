//! Chat turn endpoint

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};
use validator::Validate;

use crate::api::auth::optional_user;
use crate::api::{engine_error, error_response, validation_error};
use crate::context_engine::{ChatError, ChatTurn};
use crate::identity::ANONYMOUS_USER;
use crate::intimacy::progress;
use crate::shared_state::UnifiedAppState;

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 128))]
    pub character_id: String,
    pub session_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 32000))]
    pub message: String,
    #[validate(length(max = 256))]
    pub character_name: Option<String>,
    #[validate(length(max = 8000))]
    pub character_description: Option<String>,
    #[serde(default)]
    pub proactive_greeting: bool,
}

pub async fn chat(
    State(state): State<UnifiedAppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Value>, Response> {
    req.validate().map_err(validation_error)?;
    let caller = optional_user(&state, &headers)?;

    info!(
        "Chat turn for character {} (session {:?}, greeting {})",
        req.character_id, req.session_id, req.proactive_greeting
    );

    let (character_name, character_description) = state
        .characters()
        .persona(&req.character_id, req.character_name, req.character_description);

    let turn = ChatTurn {
        user_id: caller
            .as_ref()
            .map(|user| user.user_id.clone())
            .unwrap_or_else(|| ANONYMOUS_USER.to_string()),
        authenticated: caller.is_some(),
        auth_token: caller.map(|user| user.token),
        character_id: req.character_id,
        session_id: req.session_id,
        message: req.message,
        character_name,
        character_description,
        proactive_greeting: req.proactive_greeting,
    };

    match state.orchestrator().chat_turn(turn).await {
        Ok(reply) => {
            let level_progress = reply.intimacy.as_ref().map(|outcome| progress(outcome.new_score));
            Ok(Json(json!({
                "success": true,
                "content": reply.content,
                "session_id": reply.session_id,
                "intimacy": reply.intimacy,
                "level_progress": level_progress,
            })))
        }
        Err(ChatError::InvalidRequest(message)) => Err(error_response(StatusCode::BAD_REQUEST, message)),
        Err(ChatError::Engine(e)) => Err(engine_error("Chat turn failed", e)),
        Err(ChatError::Llm(e)) => {
            error!("Completion failed: {}", e);
            Err(error_response(StatusCode::BAD_GATEWAY, format!("LLM error: {}", e)))
        }
    }
}
