use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Extracts the session token from `Authorization: Bearer <token>`.
pub fn bearer_token(req: &Request) -> Option<Uuid> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    Uuid::parse_str(token.trim()).ok()
}

/// Requires a valid session token once a username and password are configured.
/// Without credentials this is a no-op; the access guard keeps such servers local.
pub async fn session_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.manager.config.has_credentials() {
        return next.run(req).await;
    }

    match bearer_token(&req) {
        Some(token) if state.manager.session_store().validate(token).await => next.run(req).await,
        Some(_) => AppError::Unauthorized("session expired or invalid".to_string()).into_response(),
        None => AppError::Unauthorized("missing bearer token".to_string()).into_response(),
    }
}
