//! API endpoints for intimacy scores. All of them require a bearer token.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
    Json,
};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::api::auth::require_user;
use crate::api::engine_error;
use crate::intimacy::progress;
use crate::shared_state::UnifiedAppState;

pub async fn get_intimacy(
    State(state): State<UnifiedAppState>,
    headers: HeaderMap,
    Path(character_id): Path<String>,
) -> Result<Json<Value>, Response> {
    let user = require_user(&state, &headers)?;
    let score = state.ledger().get(&user.user_id, &character_id);
    debug!("Intimacy {}/{} = {}", user.user_id, character_id, score);

    Ok(Json(json!({
        "success": true,
        "character_id": character_id,
        "intimacy": score,
        "level_progress": progress(score),
    })))
}

pub async fn increase_intimacy(
    State(state): State<UnifiedAppState>,
    headers: HeaderMap,
    Path(character_id): Path<String>,
) -> Result<Json<Value>, Response> {
    let user = require_user(&state, &headers)?;
    let outcome = state
        .ledger()
        .increase(&user.user_id, &character_id)
        .map_err(|e| engine_error("Failed to increase intimacy", e))?;

    Ok(Json(json!({
        "success": true,
        "character_id": character_id,
        "intimacy": outcome.new_score,
        "old_level": outcome.old_level,
        "new_level": outcome.new_level,
        "level_up": outcome.level_up,
        "level_progress": progress(outcome.new_score),
    })))
}

pub async fn get_all_intimacy(
    State(state): State<UnifiedAppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, Response> {
    let user = require_user(&state, &headers)?;
    let scores = state
        .ledger()
        .get_all(&user.user_id)
        .map_err(|e| engine_error("Failed to read intimacy", e))?;

    let mut intimacy = Map::new();
    for (character_id, score) in scores {
        intimacy.insert(
            character_id,
            json!({
                "intimacy": score,
                "level_progress": progress(score),
            }),
        );
    }

    Ok(Json(json!({
        "success": true,
        "intimacy": intimacy,
    })))
}
