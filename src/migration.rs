//! Backup-then-migrate-then-restore for the library database.
//!
//! A backup file always exists before the first schema statement runs, and it
//! is only removed after the migration committed and the caller did not ask to
//! keep it.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{Database, DatabaseError};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrateInput {
    /// Keep the backup at this path. When absent a transient backup is written
    /// next to the database and deleted after a successful migration.
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
}

/// Describes one migration request. Only the backup file outlives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub from_version: i64,
    pub to_version: i64,
    pub backup_path: PathBuf,
    pub caller_supplied_backup: bool,
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("error backing up database to {path}: {source}")]
    Backup { path: PathBuf, source: DatabaseError },
    #[error(
        "An error occurred migrating the database to the latest schema version. \
         The database was restored from the backup at {backup_path}.\n\
         error performing migration: {source}"
    )]
    RolledBack { backup_path: PathBuf, source: DatabaseError },
    #[error(
        "ERROR: unable to restore database from backup after migration failure: {restore}\n\
         The database may be in an inconsistent state. A copy taken before the migration \
         is kept at {backup_path}; restore it manually before restarting.\n\
         error performing migration: {migration}"
    )]
    RestoreFailed { backup_path: PathBuf, migration: DatabaseError, restore: DatabaseError },
    #[error("database not available: {0}")]
    Database(#[from] DatabaseError),
}

impl MigrationError {
    /// Backup file the operator can recover from, if one was written.
    pub fn backup_path(&self) -> Option<&PathBuf> {
        match self {
            MigrationError::RolledBack { backup_path, .. } | MigrationError::RestoreFailed { backup_path, .. } => {
                Some(backup_path)
            }
            _ => None,
        }
    }
}

/// Work to run once the schema is current, either right after a migration or
/// at startup when no migration was needed.
#[async_trait]
pub trait PostMigrateHook: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, db: &Database) -> anyhow::Result<()>;
}

/// Lets SQLite refresh its query planner statistics after schema changes.
pub struct OptimizeHook;

#[async_trait]
impl PostMigrateHook for OptimizeHook {
    fn name(&self) -> &str {
        "optimize"
    }

    async fn run(&self, db: &Database) -> anyhow::Result<()> {
        let pool = db.pool().await?;
        sqlx::query("PRAGMA optimize;").execute(&pool).await?;
        Ok(())
    }
}

/// Runs every hook in order. Failures are logged and do not stop the rest.
pub async fn run_post_migrate_hooks(db: &Database, hooks: &[Arc<dyn PostMigrateHook>]) {
    for hook in hooks {
        if let Err(e) = hook.run(db).await {
            tracing::warn!("post-migration hook {} failed: {:#}", hook.name(), e);
        }
    }
}

pub struct MigrationManager<'a> {
    db: &'a Database,
    hooks: &'a [Arc<dyn PostMigrateHook>],
}

impl<'a> MigrationManager<'a> {
    pub fn new(db: &'a Database, hooks: &'a [Arc<dyn PostMigrateHook>]) -> Self {
        Self { db, hooks }
    }

    #[tracing::instrument(skip_all, fields(backup = ?input.backup_path))]
    pub async fn migrate(&self, input: &MigrateInput) -> Result<MigrationRecord, MigrationError> {
        let from_version = self.db.version().await?;
        let caller_supplied_backup = input.backup_path.is_some();
        let backup_path = match &input.backup_path {
            Some(p) => p.clone(),
            None => self.db.default_backup_path().await?,
        };

        // always back up so that we can roll back if migration fails
        if let Err(source) = self.db.backup(&backup_path).await {
            return Err(MigrationError::Backup { path: backup_path, source });
        }
        tracing::info!("Backed up database (schema {}) to {}", from_version, backup_path.display());

        let to_version = match self.db.run_migrations().await {
            Ok(v) => v,
            Err(migration) => {
                tracing::error!("error performing migration: {}", migration);
                let restored = self.db.restore_from_backup(&backup_path).await;
                return Err(match restored {
                    Ok(()) => {
                        tracing::warn!("Database restored from {}", backup_path.display());
                        MigrationError::RolledBack { backup_path, source: migration }
                    }
                    Err(restore) => {
                        tracing::error!(
                            "unable to restore database from {}: {}",
                            backup_path.display(),
                            restore
                        );
                        MigrationError::RestoreFailed { backup_path, migration, restore }
                    }
                });
            }
        };

        run_post_migrate_hooks(self.db, self.hooks).await;

        if !caller_supplied_backup {
            if let Err(e) = std::fs::remove_file(&backup_path) {
                tracing::warn!("error removing unwanted database backup ({}): {}", backup_path.display(), e);
            }
        }

        tracing::info!("Migrated database from schema {} to {}", from_version, to_version);
        Ok(MigrationRecord { from_version, to_version, backup_path, caller_supplied_backup })
    }
}
