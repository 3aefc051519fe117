//! Bearer token handling for handlers

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;

use crate::api::error_response;
use crate::shared_state::UnifiedAppState;

/// Verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub token: String,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Caller for endpoints that accept guests. A token that is present but invalid is still a 401.
pub fn optional_user(state: &UnifiedAppState, headers: &HeaderMap) -> Result<Option<AuthenticatedUser>, Response> {
    match bearer_token(headers) {
        None => Ok(None),
        Some(token) => resolve(state, token).map(Some),
    }
}

pub fn require_user(state: &UnifiedAppState, headers: &HeaderMap) -> Result<AuthenticatedUser, Response> {
    match bearer_token(headers) {
        None => Err(error_response(StatusCode::UNAUTHORIZED, "Missing bearer token")),
        Some(token) => resolve(state, token),
    }
}

fn resolve(state: &UnifiedAppState, token: &str) -> Result<AuthenticatedUser, Response> {
    state
        .identity()
        .resolve(token)
        .map(|user_id| AuthenticatedUser {
            user_id,
            token: token.to_string(),
        })
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Invalid token"))
}
