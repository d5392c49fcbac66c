use axum::{extract::State, Json};

use crate::error::AppResult;
use crate::manager::SetupInput;
use crate::migration::{MigrateInput, MigrationRecord};
use crate::state::AppState;
use crate::status::SystemStatus;

pub async fn status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(state.manager.system_status().await)
}

/// First-run configuration. Answers with the status after setup.
pub async fn setup(State(state): State<AppState>, Json(input): Json<SetupInput>) -> AppResult<Json<SystemStatus>> {
    state.manager.setup(input).await?;
    Ok(Json(state.manager.system_status().await))
}

pub async fn migrate(
    State(state): State<AppState>,
    Json(input): Json<MigrateInput>,
) -> AppResult<Json<MigrationRecord>> {
    let record = state.manager.migrate(input).await?;
    Ok(Json(record))
}
