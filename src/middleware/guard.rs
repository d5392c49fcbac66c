use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::ip::MaybeRemoteAddr;
use crate::config::Config;
use crate::error::AppError;
use crate::session::{check_allow_public_without_auth, log_external_access_error, AccessError};
use crate::state::AppState;

/// Refuses requests from public addresses while no credentials are configured.
/// The first refused external address is recorded as the tripwire.
pub async fn external_access_guard(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    req: Request,
    next: Next,
) -> Response {
    let manager = &state.manager;
    let remote = remote.to_addr_string();
    let verdict = check_allow_public_without_auth(&manager.config, req.headers(), &remote);
    match verdict {
        Ok(()) => next.run(req).await,
        Err(e) => {
            manager.metrics.inc_external_access_rejected();
            if let AccessError::ExternalAccess(address) = &e {
                record_tripwire(&manager.config, address);
            }
            tracing::warn!(remote = %remote, "refused request to {}: {}", req.uri().path(), e);
            AppError::from(e).into_response()
        }
    }
}

/// Sets the tripwire once and returns whether this call set it. Later
/// rejections leave the recorded address alone.
pub fn record_tripwire(config: &Config, address: &str) -> bool {
    let recorded = config.update(|s| {
        let current = &mut s.security_tripwire_accessed_from_public_internet;
        if current.as_deref().is_some_and(|a| !a.is_empty()) {
            return false;
        }
        *current = Some(address.to_string());
        true
    });
    if !recorded {
        return false;
    }
    log_external_access_error(&AccessError::ExternalAccess(address.to_string()));

    // a new system has no file worth writing yet
    if config.is_new_system() || config.config_file().is_none() {
        return true;
    }
    if let Err(e) = config.write() {
        tracing::warn!("could not persist external access tripwire: {}", e);
    }
    true
}
