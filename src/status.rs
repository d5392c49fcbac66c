use std::path::PathBuf;

use serde::Serialize;

use crate::config::Config;
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatusEnum {
    Setup,
    NeedsMigration,
    Ok,
}

/// Snapshot returned by the status endpoint. Never cached.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub status: SystemStatusEnum,
    pub database_schema: Option<i64>,
    pub database_path: Option<PathBuf>,
    pub app_schema: i64,
    pub config_path: Option<PathBuf>,
}

pub fn compute_status(new_system: bool, db_schema: Option<i64>, app_schema: i64) -> SystemStatusEnum {
    if new_system {
        return SystemStatusEnum::Setup;
    }
    // an unopened database reads as schema 0
    if db_schema.unwrap_or(0) < app_schema {
        return SystemStatusEnum::NeedsMigration;
    }
    SystemStatusEnum::Ok
}

impl SystemStatus {
    pub async fn collect(config: &Config, db: &Database) -> Self {
        let database_schema = db.version().await.ok();
        let app_schema = db.app_schema_version();
        Self {
            status: compute_status(config.is_new_system(), database_schema, app_schema),
            database_schema,
            database_path: db.path().or_else(|| config.database_path()),
            app_schema,
            config_path: config.config_file(),
        }
    }
}
