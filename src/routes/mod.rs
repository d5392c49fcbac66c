//! HTTP route handlers for the administrative API.
//!
//! - `health`: liveness, readiness, version and metrics
//! - `system`: status, first-run setup and migration
//! - `auth`: session login and logout

pub mod auth;
pub mod health;
pub mod system;

use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::middleware;
use crate::state::AppState;

/// Builds the full router. Everything except `/healthz` passes the access
/// guard; migrate and logout additionally need a session when credentials are set.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/system/migrate", post(system::migrate))
        .route("/api/logout", post(auth::logout))
        .route_layer(from_fn_with_state(state.clone(), middleware::auth::session_auth));

    let guarded = Router::new()
        .route("/readyz", get(health::readyz))
        .route("/version", get(health::version))
        .route("/metrics", get(health::metrics))
        .route("/api/system/status", get(system::status))
        .route("/api/system/setup", post(system::setup))
        .route("/api/login", post(auth::login))
        .merge(protected)
        .route_layer(from_fn_with_state(state.clone(), middleware::guard::external_access_guard));

    Router::new()
        .route("/healthz", get(health::healthz))
        .merge(guarded)
        .with_state(state)
        // Body-Limit (1 MB) – die API nimmt nur kleine JSON-Objekte an
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
}
