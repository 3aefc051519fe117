//! API module - HTTP handlers over the session and relationship engine

pub mod auth;
pub mod session_api;
pub mod intimacy_api;
pub mod chat_api;
pub mod character_api;

pub use session_api::{
    append_message, clear_history, clear_session, create_session, delete_session, get_context,
    get_latest_session, get_messages, get_session, get_user_sessions,
};
pub use intimacy_api::{get_all_intimacy, get_intimacy, increase_intimacy};
pub use chat_api::chat;
pub use character_api::{get_all_character_configs, get_character_config};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::error::EngineError;

/// `{"success": false, "error": ...}` with the given status.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": message.into(),
        })),
    )
        .into_response()
}

/// Engine failures on an API path: missing records are 404, anything else is 500.
pub(crate) fn engine_error(context: &str, e: EngineError) -> Response {
    match e {
        EngineError::NotFound(what) => error_response(StatusCode::NOT_FOUND, format!("Not found: {}", what)),
        other => {
            error!("{}: {}", context, other);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {}", other))
        }
    }
}

pub(crate) fn validation_error(e: validator::ValidationErrors) -> Response {
    error_response(StatusCode::BAD_REQUEST, format!("Invalid request: {}", e))
}
