//! Character catalog endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::error_response;
use crate::characters::CharacterConfig;
use crate::shared_state::UnifiedAppState;

fn character_json(character_id: &str, config: &CharacterConfig) -> Value {
    let mut value = json!(config);
    if let Some(object) = value.as_object_mut() {
        object.insert("id".to_string(), json!(character_id));
    }
    value
}

pub async fn get_all_character_configs(State(state): State<UnifiedAppState>) -> Json<Value> {
    let configs: Vec<Value> = state
        .characters()
        .iter()
        .map(|(id, config)| character_json(id, config))
        .collect();
    debug!("Serving {} character configs", configs.len());

    Json(json!({
        "success": true,
        "configs": configs,
    }))
}

pub async fn get_character_config(
    State(state): State<UnifiedAppState>,
    Path(character_id): Path<String>,
) -> Result<Json<Value>, Response> {
    let Some(config) = state.characters().get(&character_id) else {
        warn!("Unknown character {}", character_id);
        return Err(error_response(StatusCode::NOT_FOUND, format!("Character {} not found", character_id)));
    };

    Ok(Json(json!({
        "success": true,
        "config": character_json(&character_id, config),
    })))
}
