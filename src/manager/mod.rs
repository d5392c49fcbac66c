//! Process lifecycle: bring every subsystem up once, in order, and take it down again.
//!
//! Startup order matters. Configuration and logging come first, then the
//! collaborator registry. PostInit only runs on a valid configuration; a new
//! system starts in a reduced mode until [`Manager::setup`] completes it.

mod init_cell;
mod setup;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;

pub use init_cell::InitCell;
pub use setup::{apply_setup_defaults, ResolvedSetup, SetupError, SetupInput};

use crate::config::{Config, ConfigError};
use crate::db::{Database, DatabaseError};
use crate::downloads::DownloadStore;
use crate::jobs::JobManager;
use crate::logging;
use crate::metrics::Metrics;
use crate::migration::{
    run_post_migrate_hooks, MigrateInput, MigrationError, MigrationManager, MigrationRecord, OptimizeHook,
    PostMigrateHook,
};
use crate::paths::{self, GeneratedPaths, Paths};
use crate::plugins::{PluginCache, ScraperCache};
use crate::session::{check_external_access_tripwire, log_external_access_error, SessionStore};
use crate::status::SystemStatus;
use crate::streaming::{DlnaService, StreamingService};
use crate::transcoder::{self, HttpDownloader, TranscoderAcquirer, TranscoderError, TranscoderPaths};

/// Startup failures that must stop the process instead of limping along.
#[derive(Debug, Error)]
pub enum FatalStartupError {
    #[error("error initializing configuration: {0}")]
    ConfigLoad(#[source] ConfigError),
    #[error("error initializing configuration: {0}")]
    InvalidConfig(#[source] ConfigError),
    #[error("error initializing the database: {0}")]
    Database(#[source] DatabaseError),
}

/// Collaborators and tunables that differ between production and tests.
pub struct ManagerOptions {
    pub database: Database,
    pub acquirer: Option<Arc<dyn TranscoderAcquirer>>,
    pub streaming: Option<Arc<dyn StreamingService>>,
    pub post_migrate_hooks: Vec<Arc<dyn PostMigrateHook>>,
    /// How long PostInit waits for stale temp files to be deleted.
    pub cleanup_timeout: Duration,
    /// Base for setup defaults and the second transcoder search location.
    pub home_dir: Option<PathBuf>,
    /// Also look for the transcoder on `PATH`.
    pub search_system_path: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            database: Database::new(),
            acquirer: None,
            streaming: None,
            post_migrate_hooks: vec![Arc::new(OptimizeHook)],
            cleanup_timeout: Duration::from_secs(1),
            home_dir: paths::home_directory(),
            search_system_path: true,
        }
    }
}

pub struct Manager {
    pub config: Arc<Config>,
    pub database: Database,
    pub jobs: JobManager,
    pub downloads: DownloadStore,
    pub plugins: PluginCache,
    pub streaming: Arc<dyn StreamingService>,
    pub metrics: Metrics,
    paths: RwLock<Option<Paths>>,
    transcoder: RwLock<TranscoderPaths>,
    session_store: RwLock<Arc<SessionStore>>,
    scrapers: RwLock<Arc<ScraperCache>>,
    hooks: Vec<Arc<dyn PostMigrateHook>>,
    acquirer: Arc<dyn TranscoderAcquirer>,
    cleanup_timeout: Duration,
    home_dir: Option<PathBuf>,
    search_system_path: bool,
    // serializes setup and migrate
    admin: tokio::sync::Mutex<()>,
}

impl Manager {
    /// Loads configuration from the usual places and initializes everything.
    pub async fn start() -> Result<Arc<Self>, FatalStartupError> {
        let config = Config::load().map_err(FatalStartupError::ConfigLoad)?;
        Self::initialize(config, ManagerOptions::default()).await
    }

    pub async fn initialize(config: Config, options: ManagerOptions) -> Result<Arc<Self>, FatalStartupError> {
        let settings = config.settings();
        logging::init(&settings);

        let config = Arc::new(config);
        let acquirer = options.acquirer.unwrap_or_else(|| {
            Arc::new(HttpDownloader::new(settings.ffmpeg_download_url.clone(), settings.ffprobe_download_url.clone()))
        });
        let streaming = options.streaming.unwrap_or_else(|| Arc::new(DlnaService::new(config.clone())));

        // on a new system this store is temporary; PostInit replaces it
        let session_store = Arc::new(SessionStore::new(config.clone()));

        let manager = Arc::new(Self {
            database: options.database,
            jobs: JobManager::new(),
            downloads: DownloadStore::new(),
            plugins: PluginCache::new(config.clone()),
            streaming,
            metrics: Metrics::new(),
            paths: RwLock::new(None),
            transcoder: RwLock::new(TranscoderPaths::default()),
            session_store: RwLock::new(session_store),
            scrapers: RwLock::new(Arc::new(ScraperCache::default())),
            hooks: options.post_migrate_hooks,
            acquirer,
            cleanup_timeout: options.cleanup_timeout,
            home_dir: options.home_dir,
            search_system_path: options.search_system_path,
            admin: tokio::sync::Mutex::new(()),
            config,
        });

        if !manager.config.is_new_system() {
            if let Some(file) = manager.config.config_file() {
                tracing::info!("using config file: {}", file.display());
            }
            manager.config.validate().map_err(FatalStartupError::InvalidConfig)?;
            manager.post_init().await.map_err(FatalStartupError::Database)?;
            manager.init_security();
        } else {
            let cfg_file = manager.config.config_file().map(|p| format!("{} ", p.display())).unwrap_or_default();
            tracing::warn!("config file {}not found. Assuming new system...", cfg_file);
        }

        if let Err(e) = manager.init_transcoder().await {
            tracing::warn!("could not initialize FFMPEG subsystem: {}", e);
        }

        if settings.dlna_default_enabled {
            if let Err(e) = manager.streaming.start() {
                tracing::warn!("could not start DLNA service: {}", e);
            }
        }

        Ok(manager)
    }

    fn init_security(&self) {
        if let Err(e) = check_external_access_tripwire(&self.config) {
            log_external_access_error(&e);
        }
    }

    /// Brings up everything that depends on a complete configuration. Only a
    /// failure to open the database is an error; everything else degrades to a warning.
    #[tracing::instrument(skip_all)]
    pub async fn post_init(&self) -> Result<(), DatabaseError> {
        self.refresh_config();

        let store = Arc::new(SessionStore::new(self.config.clone()));
        *self.session_store.write().unwrap_or_else(|e| e.into_inner()) = store.clone();
        self.plugins.register_session_store(store);

        if let Err(e) = self.plugins.load_plugins() {
            tracing::error!("Error reading plugin configs: {}", e);
        }
        self.refresh_scraper_cache();

        self.clear_temp_dirs().await;

        let db_path = self.config.database_path().ok_or(DatabaseError::NoPath)?;
        self.database.initialize(&db_path).await?;

        match self.database.ready().await {
            Ok(()) => self.post_migrate().await,
            Err(e) => tracing::warn!("{}", e),
        }
        Ok(())
    }

    /// Empties the download stage and tmp directories. Waits at most
    /// `cleanup_timeout`; slower deletions finish as a background job.
    async fn clear_temp_dirs(&self) {
        let Some(current) = self.paths() else {
            return;
        };
        let GeneratedPaths { downloads, tmp, .. } = current.generated;

        let forgotten = self.downloads.clear();
        if forgotten > 0 {
            tracing::debug!("forgot {} staged downloads", forgotten);
        }

        let mut handle = tokio::task::spawn_blocking(move || {
            for (label, dir) in [("Downloads", downloads), ("Tmp", tmp)] {
                if let Err(e) = paths::empty_dir(&dir) {
                    tracing::warn!("could not empty {} directory: {}", label, e);
                }
            }
        });

        if tokio::time::timeout(self.cleanup_timeout, &mut handle).await.is_err() {
            tracing::info!("Still deleting temporary files, continuing startup");
            self.metrics.inc_temp_cleanups_deferred();
            self.jobs
                .spawn("delete temporary files", move |_cancel| async move {
                    if handle.await.is_ok() {
                        tracing::info!("Temporary files deleted.");
                    }
                })
                .await;
        }
    }

    /// Rebuilds the generated paths from configuration and, if the
    /// configuration is valid, makes sure the directories exist.
    pub fn refresh_config(&self) {
        let paths = self.config.generated_path().map(Paths::new);
        if let Some(p) = &paths {
            if self.config.validate().is_ok() {
                p.provision();
            }
        }
        *self.paths.write().unwrap_or_else(|e| e.into_inner()) = paths;
    }

    /// Reloads scraper descriptors. Call after scraper configuration changes.
    pub fn refresh_scraper_cache(&self) {
        let cache = ScraperCache::new(&self.config).unwrap_or_else(|e| {
            tracing::error!("Error reading scraper configs: {}", e);
            ScraperCache::default()
        });
        *self.scrapers.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(cache);
    }

    pub async fn post_migrate(&self) {
        run_post_migrate_hooks(&self.database, &self.hooks).await;
        self.metrics.inc_post_migrate_runs();
    }

    /// Looks for the transcoder next to the config file and in the home
    /// directory, downloading it into the config directory when missing.
    pub async fn init_transcoder(&self) -> Result<(), TranscoderError> {
        // only once a config file location is known
        let Some(config_dir) = self.config.config_dir() else {
            return Ok(());
        };

        let mut dirs = vec![config_dir.clone()];
        if let Some(home) = self.home_dir.as_ref().filter(|h| **h != config_dir) {
            dirs.push(home.clone());
        }
        if self.search_system_path {
            dirs = transcoder::with_system_path(dirs);
        }

        let found = transcoder::locate_or_acquire(&dirs, &config_dir, self.acquirer.as_ref()).await?;
        *self.transcoder.write().unwrap_or_else(|e| e.into_inner()) = found;
        Ok(())
    }

    pub fn transcoder(&self) -> TranscoderPaths {
        self.transcoder.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn paths(&self) -> Option<Paths> {
        self.paths.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn session_store(&self) -> Arc<SessionStore> {
        self.session_store.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn scrapers(&self) -> Arc<ScraperCache> {
        self.scrapers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn migrate(&self, input: MigrateInput) -> Result<MigrationRecord, MigrationError> {
        let _admin = self.admin.lock().await;
        let result = MigrationManager::new(&self.database, &self.hooks).migrate(&input).await;
        match &result {
            Ok(_) => {
                self.metrics.inc_migrations_run();
                self.metrics.inc_post_migrate_runs();
            }
            Err(e) => {
                self.metrics.inc_migrations_failed();
                if matches!(e, MigrationError::RolledBack { .. }) {
                    self.metrics.inc_restores();
                }
            }
        }
        result
    }

    pub async fn system_status(&self) -> SystemStatus {
        SystemStatus::collect(&self.config, &self.database).await
    }

    /// Stops the streaming service, cancels background jobs and closes the
    /// database. Returns the exit code to use.
    pub async fn close_for_exit(&self, code: i32) -> i32 {
        self.streaming.stop();
        let cancelled = self.jobs.stop_all().await;
        if cancelled > 0 {
            tracing::info!("cancelled {} background jobs", cancelled);
        }
        let closed = self.database.close().await;
        if let Err(e) = &closed {
            tracing::error!("Error closing database: {}", e);
        }
        exit_code_after_close(code, closed.is_ok())
    }

    /// Closes the database and terminates the process.
    pub async fn shutdown(&self, code: i32) -> ! {
        let code = self.close_for_exit(code).await;
        tracing::info!("exiting with code {}", code);
        logging::flush();
        std::process::exit(code)
    }
}

/// A failed close turns a clean exit into a failing one; any other requested code is kept.
pub fn exit_code_after_close(requested: i32, closed_ok: bool) -> i32 {
    if !closed_ok && requested == 0 {
        1
    } else {
        requested
    }
}
