use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Executor, SqlitePool};
use thiserror::Error;
use tokio::sync::RwLock;

/// A single forward-only schema step. `version` becomes `PRAGMA user_version`
/// once the step has committed.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, name: "initial", sql: include_str!("../migrations/1_initial.sql") },
    Migration { version: 2, name: "tag_aliases", sql: include_str!("../migrations/2_tag_aliases.sql") },
    Migration { version: 3, name: "file_fingerprints", sql: include_str!("../migrations/3_file_fingerprints.sql") },
];

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database is not open")]
    NotOpen,
    #[error("database path is not set")]
    NoPath,
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("migration {version} ({name}) failed: {source}")]
    Migration { version: i64, name: &'static str, source: sqlx::Error },
    #[error("database schema version {db} is newer than the application schema version {app}")]
    SchemaTooNew { db: i64, app: i64 },
    #[error("database schema version {db} needs migration to {app}")]
    NeedsMigration { db: i64, app: i64 },
    #[error("backup target {0} already exists")]
    BackupExists(PathBuf),
}

/// Handle to the single SQLite library database.
///
/// The pool is swapped out wholesale on close/restore, so callers should fetch
/// it through [`Database::pool`] per operation instead of caching it.
pub struct Database {
    migrations: Vec<Migration>,
    path: std::sync::RwLock<Option<PathBuf>>,
    pool: RwLock<Option<SqlitePool>>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_migrations(MIGRATIONS.to_vec())
    }

    pub fn with_migrations(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self {
            migrations,
            path: std::sync::RwLock::new(None),
            pool: RwLock::new(None),
        }
    }

    /// Schema version this build expects.
    pub fn app_schema_version(&self) -> i64 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn is_open(&self) -> bool {
        self.pool.read().await.is_some()
    }

    pub async fn pool(&self) -> Result<SqlitePool, DatabaseError> {
        self.pool.read().await.clone().ok_or(DatabaseError::NotOpen)
    }

    /// Opens (creating if needed) the database at `path`. A fresh database is
    /// brought straight to the current schema; an existing one is left alone
    /// so the caller can decide whether to migrate.
    pub async fn initialize(&self, path: &Path) -> Result<(), DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|source| DatabaseError::Io { path: parent.to_path_buf(), source })?;
        }

        self.open(path).await?;

        let db = self.version().await?;
        let app = self.app_schema_version();
        if db > app {
            return Err(DatabaseError::SchemaTooNew { db, app });
        }
        if db == 0 {
            tracing::info!("Creating database schema at {}", path.display());
            self.run_migrations().await?;
        }
        Ok(())
    }

    async fn open(&self, path: &Path) -> Result<(), DatabaseError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    // best-effort tuning
                    if let Err(e) = sqlx::query("PRAGMA cache_size=-65536;").execute(&mut *conn).await {
                        tracing::warn!("Failed to set cache_size: {}", e);
                    }
                    if let Err(e) = sqlx::query("PRAGMA temp_store=MEMORY;").execute(&mut *conn).await {
                        tracing::warn!("Failed to set temp_store: {}", e);
                    }
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        if let Some(old) = self.pool.write().await.replace(pool) {
            old.close().await;
        }
        *self.path.write().unwrap_or_else(|e| e.into_inner()) = Some(path.to_path_buf());
        Ok(())
    }

    /// Checkpoints the WAL and closes the pool. The pool is closed even if the
    /// checkpoint fails; the checkpoint error is returned.
    pub async fn close(&self) -> Result<(), DatabaseError> {
        let Some(pool) = self.pool.write().await.take() else {
            return Ok(());
        };
        let checkpoint = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);").execute(&pool).await;
        pool.close().await;
        checkpoint.map(|_| ()).map_err(DatabaseError::from)
    }

    /// Stored schema version (`PRAGMA user_version`).
    pub async fn version(&self) -> Result<i64, DatabaseError> {
        let pool = self.pool().await?;
        Ok(sqlx::query_scalar::<_, i64>("PRAGMA user_version").fetch_one(&pool).await?)
    }

    /// `Ok` when the stored schema matches what this build expects.
    pub async fn ready(&self) -> Result<(), DatabaseError> {
        let db = self.version().await?;
        let app = self.app_schema_version();
        if db < app {
            return Err(DatabaseError::NeedsMigration { db, app });
        }
        Ok(())
    }

    /// Applies every pending migration in ascending order. Each step runs in its
    /// own transaction, so a failure leaves the database at the last committed step.
    pub async fn run_migrations(&self) -> Result<i64, DatabaseError> {
        let pool = self.pool().await?;
        let current = self.version().await?;

        for m in self.migrations.iter().filter(|m| m.version > current) {
            tracing::info!("Applying migration {} ({})", m.version, m.name);
            let fail = |source: sqlx::Error| DatabaseError::Migration { version: m.version, name: m.name, source };

            let mut tx = pool.begin().await?;
            (&mut *tx).execute(m.sql).await.map_err(fail)?;
            let bump = format!("PRAGMA user_version = {}", m.version);
            (&mut *tx).execute(bump.as_str()).await.map_err(fail)?;
            tx.commit().await.map_err(fail)?;
        }

        self.version().await
    }

    /// Writes a consistent copy of the live database to `target`. Never
    /// overwrites an existing file.
    pub async fn backup(&self, target: &Path) -> Result<(), DatabaseError> {
        if target.exists() {
            return Err(DatabaseError::BackupExists(target.to_path_buf()));
        }
        let pool = self.pool().await?;
        sqlx::query("VACUUM INTO ?1")
            .bind(target.to_string_lossy().into_owned())
            .execute(&pool)
            .await?;
        Ok(())
    }

    /// `<db path>.<schema version>.<YYYYMMDD_HHMMSS>`, with a `.N` counter
    /// appended when a backup from the same second is still around.
    pub async fn default_backup_path(&self) -> Result<PathBuf, DatabaseError> {
        let path = self.path().ok_or(DatabaseError::NoPath)?;
        let version = self.version().await?;
        Ok(unused_path(backup_path_for(&path, version, Local::now())))
    }

    /// Replaces the live database with the contents of `backup`.
    ///
    /// The backup is copied to a staging file next to the live one and renamed
    /// over it, so there is never a moment without a complete database file.
    /// The backup itself is left in place.
    pub async fn restore_from_backup(&self, backup: &Path) -> Result<(), DatabaseError> {
        let live = self.path().ok_or(DatabaseError::NoPath)?;

        if let Err(e) = self.close().await {
            tracing::warn!("error closing database before restore: {}", e);
        }

        let (src, dst) = (backup.to_path_buf(), live.clone());
        let swapped = tokio::task::spawn_blocking(move || swap_in(&src, &dst))
            .await
            .map_err(|e| DatabaseError::Io { path: live.clone(), source: io::Error::new(io::ErrorKind::Other, e) })
            .and_then(|r| r);

        // reopen whatever is on disk now, so the server is not left without a handle
        let reopened = self.open(&live).await;
        swapped?;
        reopened
    }
}

pub fn backup_path_for(db: &Path, version: i64, at: DateTime<Local>) -> PathBuf {
    let mut name = db.as_os_str().to_owned();
    name.push(format!(".{}.{}", version, at.format("%Y%m%d_%H%M%S")));
    PathBuf::from(name)
}

fn unused_path(base: PathBuf) -> PathBuf {
    let mut candidate = base.clone();
    let mut n = 0u32;
    while candidate.exists() {
        n += 1;
        candidate = sidecar(&base, &format!(".{}", n));
    }
    candidate
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn swap_in(backup: &Path, live: &Path) -> Result<(), DatabaseError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DatabaseError::Io { path, source }
    };
    let staging = sidecar(live, ".restore");

    std::fs::copy(backup, &staging).map_err(io_err(&staging))?;
    if let Err(e) = std::fs::File::open(&staging).and_then(|f| f.sync_all()) {
        let _ = std::fs::remove_file(&staging);
        return Err(io_err(&staging)(e));
    }

    // stale WAL frames would be replayed on top of the restored file
    for suffix in ["-wal", "-shm"] {
        let p = sidecar(live, suffix);
        match std::fs::remove_file(&p) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                let _ = std::fs::remove_file(&staging);
                return Err(io_err(&p)(e));
            }
        }
    }

    if let Err(e) = std::fs::rename(&staging, live) {
        let _ = std::fs::remove_file(&staging);
        return Err(io_err(live)(e));
    }
    Ok(())
}
