use axum::{
    extract::{Request, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::bearer_token;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: Uuid,
    pub expires_in: u64,
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> AppResult<Json<LoginResponse>> {
    let store = state.manager.session_store();
    let token = store.login(&req.username, &req.password).await?;
    tracing::info!("user {} logged in", req.username);
    Ok(Json(LoginResponse { token, expires_in: store.max_age().as_secs() }))
}

pub async fn logout(State(state): State<AppState>, req: Request) -> AppResult<StatusCode> {
    let token = bearer_token(&req).ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
    state.manager.session_store().logout(token).await;
    Ok(StatusCode::NO_CONTENT)
}
