//! API endpoints for session lifecycle and per-user session lookup

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::api::auth::{optional_user, require_user};
use crate::api::{engine_error, error_response, validation_error};
use crate::identity::ANONYMOUS_USER;
use crate::memory::Role;
use crate::memory_db::Session;
use crate::shared_state::UnifiedAppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 128))]
    pub character_id: String,
    #[validate(length(min = 1, max = 128))]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AppendMessageRequest {
    pub role: String,
    #[validate(length(min = 1, max = 32000))]
    pub content: String,
    #[validate(length(min = 1, max = 128))]
    pub character_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    pub character_name: Option<String>,
    pub character_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserSessionsQuery {
    pub character_id: Option<String>,
}

/// Public view of a session; the creating token stays server-side.
fn session_json(session: &Session) -> Value {
    json!({
        "id": session.id,
        "character_id": session.character_id,
        "user_id": session.user_id,
        "created_at": session.created_at,
        "last_activity": session.last_activity,
        "messages": session.messages,
        "context_summary": session.context_summary,
    })
}

pub async fn create_session(
    State(state): State<UnifiedAppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Value>, Response> {
    req.validate().map_err(validation_error)?;
    let caller = optional_user(&state, &headers)?;

    let user_id = caller
        .as_ref()
        .map(|user| user.user_id.clone())
        .or(req.user_id)
        .unwrap_or_else(|| ANONYMOUS_USER.to_string());
    let token = caller.as_ref().map(|user| user.token.as_str());

    let session_id = state
        .sessions()
        .create(&req.character_id, &user_id, token)
        .map_err(|e| engine_error("Failed to create session", e))?;

    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "user_id": user_id,
    })))
}

pub async fn get_session(
    State(state): State<UnifiedAppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, Response> {
    match state.sessions().get(&session_id) {
        Ok(Some(session)) => Ok(Json(json!({
            "success": true,
            "session": session_json(&session),
        }))),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Session not found: {}", session_id),
        )),
        Err(e) => Err(engine_error("Failed to fetch session", e)),
    }
}

/// Messages of a session; empty when it is missing or expired.
pub async fn get_messages(
    State(state): State<UnifiedAppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, Response> {
    let messages = state
        .sessions()
        .get(&session_id)
        .map_err(|e| engine_error("Failed to fetch messages", e))?
        .map(|session| session.messages)
        .unwrap_or_default();

    Ok(Json(json!({
        "success": true,
        "messages": messages,
    })))
}

pub async fn append_message(
    State(state): State<UnifiedAppState>,
    Path(session_id): Path<String>,
    Json(req): Json<AppendMessageRequest>,
) -> Result<Json<Value>, Response> {
    req.validate().map_err(validation_error)?;
    let role: Role = req
        .role
        .parse()
        .map_err(|e: String| error_response(StatusCode::BAD_REQUEST, e))?;

    let appended = state
        .sessions()
        .append(&session_id, role, &req.content, req.character_id.as_deref())
        .map_err(|e| engine_error("Failed to append message", e))?;

    if !appended {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Session not found: {}", session_id),
        ));
    }
    Ok(Json(json!({ "success": true, "session_id": session_id })))
}

pub async fn clear_session(
    State(state): State<UnifiedAppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, Response> {
    let cleared = state
        .sessions()
        .clear(&session_id)
        .map_err(|e| engine_error("Failed to clear session", e))?;

    if !cleared {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Session not found: {}", session_id),
        ));
    }
    Ok(Json(json!({ "success": true, "session_id": session_id })))
}

pub async fn delete_session(
    State(state): State<UnifiedAppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, Response> {
    let deleted = state
        .sessions()
        .delete(&session_id)
        .map_err(|e| engine_error("Failed to delete session", e))?;

    if !deleted {
        info!("Session not found for deletion: {}", session_id);
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Session not found: {}", session_id),
        ));
    }
    Ok(Json(json!({ "success": true, "session_id": session_id })))
}

/// Messages that would be sent to the model for the next turn.
pub async fn get_context(
    State(state): State<UnifiedAppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<Value>, Response> {
    let character_id = state
        .sessions()
        .get(&session_id)
        .map_err(|e| engine_error("Failed to load session", e))?
        .map(|session| session.character_id);
    let (character_name, character_description) = match character_id {
        Some(character_id) => state
            .characters()
            .persona(&character_id, query.character_name, query.character_description),
        None => (query.character_name, query.character_description),
    };

    let messages = state
        .orchestrator()
        .context_builder()
        .build(&session_id, character_name.as_deref(), character_description.as_deref())
        .map_err(|e| engine_error("Failed to build context", e))?;

    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "messages": messages,
    })))
}

pub async fn get_user_sessions(
    State(state): State<UnifiedAppState>,
    headers: HeaderMap,
    Query(query): Query<UserSessionsQuery>,
) -> Result<Json<Value>, Response> {
    let user = require_user(&state, &headers)?;
    let sessions = state
        .sessions()
        .list_for_user(&user.user_id, query.character_id.as_deref())
        .map_err(|e| engine_error("Failed to list sessions", e))?;

    Ok(Json(json!({
        "success": true,
        "sessions": sessions,
    })))
}

pub async fn get_latest_session(
    State(state): State<UnifiedAppState>,
    headers: HeaderMap,
    Path(character_id): Path<String>,
) -> Result<Json<Value>, Response> {
    let user = require_user(&state, &headers)?;
    let latest = state
        .sessions()
        .latest_for(&user.user_id, &character_id)
        .map_err(|e| engine_error("Failed to look up latest session", e))?;

    match latest {
        Some(session_id) => Ok(Json(json!({
            "success": true,
            "session_id": session_id,
        }))),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("No session with character {}", character_id),
        )),
    }
}

/// Delete every session and intimacy record of the caller.
pub async fn clear_history(
    State(state): State<UnifiedAppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, Response> {
    let user = require_user(&state, &headers)?;
    info!("Clearing all history for user {}", user.user_id);

    let deleted_sessions = state
        .sessions()
        .delete_all_for_user(&user.user_id)
        .map_err(|e| engine_error("Failed to delete sessions", e))?;
    let cleared_intimacy = state
        .ledger()
        .clear_user(&user.user_id)
        .map_err(|e| engine_error("Failed to clear intimacy", e))?;

    Ok(Json(json!({
        "success": true,
        "deleted_sessions": deleted_sessions,
        "cleared_intimacy": cleared_intimacy,
    })))
}
