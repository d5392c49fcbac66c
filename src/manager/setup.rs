use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::Manager;
use crate::config::{keys, ConfigError};
use crate::db::DatabaseError;
use crate::paths;
use crate::transcoder::TranscoderError;

const CONFIG_FILE_NAME: &str = "config.toml";
const GENERATED_DIR_NAME: &str = "generated";
const DATABASE_FILE_NAME: &str = "mediathek.sqlite";

/// First-run configuration. Unset locations get defaults next to the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupInput {
    #[serde(default)]
    pub config_location: Option<PathBuf>,
    #[serde(default)]
    pub generated_location: Option<PathBuf>,
    #[serde(default)]
    pub database_file: Option<PathBuf>,
    #[serde(default)]
    pub libraries: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSetup {
    pub config_location: PathBuf,
    pub generated_location: PathBuf,
    pub database_file: PathBuf,
    pub libraries: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("system is already configured")]
    AlreadyConfigured,
    #[error("could not determine a home directory for the default config location")]
    NoHomeDirectory,
    #[error("error creating config directory {path}: {source}")]
    CreateConfigDir { path: PathBuf, source: std::io::Error },
    #[error("error creating config file {path}: {source}")]
    CreateConfigFile { path: PathBuf, source: std::io::Error },
    #[error("error creating generated directory {path}: {source}")]
    CreateGeneratedDir { path: PathBuf, source: std::io::Error },
    #[error("error writing configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("error initializing the database: {0}")]
    Database(#[from] DatabaseError),
    #[error("error initializing FFMPEG subsystem: {0}")]
    Transcoder(#[from] TranscoderError),
}

fn blank(p: &Option<PathBuf>) -> Option<&PathBuf> {
    p.as_ref().filter(|p| !p.as_os_str().is_empty())
}

/// Fills in unset locations. `default_config` is used when the input names no
/// config file; generated content and the database default to siblings of it.
pub fn apply_setup_defaults(input: &SetupInput, default_config: Option<&Path>) -> Result<ResolvedSetup, SetupError> {
    let config_location = match blank(&input.config_location) {
        Some(p) => p.clone(),
        None => default_config.map(Path::to_path_buf).ok_or(SetupError::NoHomeDirectory)?,
    };
    let config_dir = match config_location.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok(ResolvedSetup {
        generated_location: blank(&input.generated_location)
            .cloned()
            .unwrap_or_else(|| config_dir.join(GENERATED_DIR_NAME)),
        database_file: blank(&input.database_file).cloned().unwrap_or_else(|| config_dir.join(DATABASE_FILE_NAME)),
        libraries: input.libraries.clone(),
        config_location,
    })
}

impl Manager {
    /// Turns a new system into a configured one.
    ///
    /// Steps run in order and nothing is rolled back: a failure leaves earlier
    /// steps on disk. The new-system flag is only cleared at the end, so calling
    /// `setup` again after a failure repeats the whole sequence.
    #[tracing::instrument(skip_all)]
    pub async fn setup(&self, input: SetupInput) -> Result<(), SetupError> {
        let _admin = self.admin.lock().await;
        if !self.config.is_new_system() {
            return Err(SetupError::AlreadyConfigured);
        }

        let mut input = input;
        if self.config.file_env_set() {
            // MEDIATHEK_CONFIG pins the location
            input.config_location = self.config.config_file();
        }
        let default_config = self.home_dir.as_ref().map(|h| h.join(CONFIG_FILE_NAME));
        let resolved = apply_setup_defaults(&input, default_config.as_deref())?;

        if !self.config.file_env_set() {
            let cfg = &resolved.config_location;
            if let Some(dir) = cfg.parent().filter(|d| !d.as_os_str().is_empty()) {
                paths::ensure_dir(dir)
                    .map_err(|source| SetupError::CreateConfigDir { path: dir.to_path_buf(), source })?;
            }
            paths::touch(cfg).map_err(|source| SetupError::CreateConfigFile { path: cfg.clone(), source })?;
            self.config.set_config_file(cfg);
        }

        if !self.config.has_override(keys::GENERATED) {
            let generated = &resolved.generated_location;
            paths::ensure_dir(generated)
                .map_err(|source| SetupError::CreateGeneratedDir { path: generated.clone(), source })?;
            let generated = generated.clone();
            self.config.update(|s| s.generated = Some(generated));
        }

        if !self.config.has_override(keys::DATABASE) {
            let database = resolved.database_file.clone();
            self.config.update(|s| s.database = Some(database));
        }

        let libraries = resolved.libraries.clone();
        self.config.update(|s| s.libraries = libraries);

        self.config.write()?;
        tracing::info!("wrote configuration to {}", resolved.config_location.display());

        self.post_init().await?;
        self.config.finalize_setup();
        self.metrics.inc_setups_completed();

        self.init_transcoder().await?;
        Ok(())
    }
}
