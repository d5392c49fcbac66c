use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for environment overrides, e.g. `MEDIATHEK_DATABASE`.
pub const ENV_PREFIX: &str = "MEDIATHEK";
/// Explicit config file location. When set, setup never relocates the config file.
pub const CONFIG_FILE_ENV: &str = "MEDIATHEK_CONFIG";

const DEFAULTS: &str = include_str!("../config/default.toml");

/// Configuration keys referenced outside this module.
pub mod keys {
    pub const GENERATED: &str = "generated";
    pub const DATABASE: &str = "database";
    pub const LIBRARIES: &str = "libraries";
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse configuration: {0}")]
    Parse(#[from] ::config::ConfigError),
    #[error("missing required configuration key: {0}")]
    Missing(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("no config file set")]
    NoConfigFile,
    #[error("could not serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not write config file {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Flat key/value settings as they appear in `config.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub libraries: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_tripwire_accessed_from_public_internet: Option<String>,
    // not exposed through the API; only settable by hand in the file or env
    #[serde(default, skip_serializing_if = "is_false")]
    pub dangerous_allow_public_without_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    pub log_out: bool,
    pub log_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_profile_path: Option<PathBuf>,
    pub dlna_default_enabled: bool,
    pub session_max_age_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrapers_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffprobe_download_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        match ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()
            .and_then(|cfg| cfg.try_deserialize())
        {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

fn non_empty_path(p: &Option<PathBuf>) -> Option<PathBuf> {
    p.as_ref().filter(|p| !p.as_os_str().is_empty()).cloned()
}

fn non_empty_str(s: &Option<String>) -> Option<String> {
    s.as_ref().filter(|s| !s.is_empty()).cloned()
}

/// Process-wide configuration store.
///
/// Reads are cheap snapshots; writes go through [`Config::update`] and are only
/// persisted by an explicit [`Config::write`].
#[derive(Debug)]
pub struct Config {
    settings: RwLock<Settings>,
    config_file: RwLock<Option<PathBuf>>,
    file_from_env: bool,
    overrides: HashSet<String>,
    new_system: AtomicBool,
}

impl Config {
    /// Loads configuration the way the server does at startup:
    /// embedded defaults -> config file -> `MEDIATHEK_*` environment.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env first (optional)
        let _ = dotenvy::dotenv();

        let (file, from_env) = match std::env::var(CONFIG_FILE_ENV) {
            Ok(p) if !p.is_empty() => (Some(PathBuf::from(p)), true),
            _ => (Self::find_config_file(), false),
        };
        Self::build(file, Some(ENV_PREFIX), from_env)
    }

    /// Loads defaults plus the given file, ignoring the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::build(Some(path.as_ref().to_path_buf()), None, false)
    }

    /// Defaults only, no backing file. Always a new system.
    pub fn in_memory() -> Self {
        Self::from_parts(Settings::default(), None, false, HashSet::new(), true)
    }

    /// Like [`Config::load`] but with an explicit file and environment prefix.
    pub fn with_env(file: Option<PathBuf>, env_prefix: &str) -> Result<Self, ConfigError> {
        Self::build(file, Some(env_prefix), false)
    }

    fn from_parts(
        settings: Settings,
        config_file: Option<PathBuf>,
        file_from_env: bool,
        overrides: HashSet<String>,
        new_system: bool,
    ) -> Self {
        Self {
            settings: RwLock::new(settings),
            config_file: RwLock::new(config_file),
            file_from_env,
            overrides,
            new_system: AtomicBool::new(new_system),
        }
    }

    fn find_config_file() -> Option<PathBuf> {
        let mut candidates = vec![PathBuf::from("config.toml")];
        if let Some(home) = crate::paths::home_directory() {
            candidates.push(home.join("config.toml"));
        }
        candidates.into_iter().find(|p| p.is_file())
    }

    fn build(file: Option<PathBuf>, env_prefix: Option<&str>, file_from_env: bool) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml));

        let mut new_system = true;
        if let Some(path) = file.as_ref().filter(|p| p.is_file()) {
            let contents = std::fs::read_to_string(path)
                .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
            // a touched-but-empty file (interrupted setup) still counts as a new system
            if !contents.trim().is_empty() {
                builder = builder.add_source(::config::File::from_str(&contents, ::config::FileFormat::Toml));
                new_system = false;
            }
        }

        let mut overrides = HashSet::new();
        if let Some(prefix) = env_prefix {
            builder = builder.add_source(
                ::config::Environment::with_prefix(prefix)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key(keys::LIBRARIES),
            );
            overrides = env_override_keys(prefix);
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(Self::from_parts(settings, file, file_from_env, overrides, new_system))
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> Settings {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mutates settings in memory. Call [`Config::write`] to persist.
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Settings) -> R,
    {
        let mut guard = self.settings.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn config_file(&self) -> Option<PathBuf> {
        self.config_file.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_config_file(&self, path: impl Into<PathBuf>) {
        *self.config_file.write().unwrap_or_else(|e| e.into_inner()) = Some(path.into());
    }

    /// Directory containing the config file.
    pub fn config_dir(&self) -> Option<PathBuf> {
        self.config_file().map(|p| match p.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        })
    }

    /// True if the config file location came from `MEDIATHEK_CONFIG`.
    pub fn file_env_set(&self) -> bool {
        self.file_from_env
    }

    /// True if `key` was supplied through the environment.
    pub fn has_override(&self, key: &str) -> bool {
        self.overrides.contains(key)
    }

    pub fn is_new_system(&self) -> bool {
        self.new_system.load(Ordering::SeqCst)
    }

    pub fn finalize_setup(&self) {
        self.new_system.store(false, Ordering::SeqCst);
    }

    pub fn has_credentials(&self) -> bool {
        let s = self.settings.read().unwrap_or_else(|e| e.into_inner());
        non_empty_str(&s.username).is_some() && non_empty_str(&s.password).is_some()
    }

    pub fn dangerous_allow_public_without_auth(&self) -> bool {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).dangerous_allow_public_without_auth
    }

    pub fn tripwire(&self) -> Option<String> {
        non_empty_str(&self.settings.read().unwrap_or_else(|e| e.into_inner()).security_tripwire_accessed_from_public_internet)
    }

    pub fn generated_path(&self) -> Option<PathBuf> {
        non_empty_path(&self.settings.read().unwrap_or_else(|e| e.into_inner()).generated)
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        non_empty_path(&self.settings.read().unwrap_or_else(|e| e.into_inner()).database)
    }

    /// Checks that the minimum keys for a running server are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = self.settings();
        if s.port == 0 {
            return Err(ConfigError::Invalid(format!("invalid port: {}", s.port)));
        }
        // Warn for privileged ports on Unix-like systems
        #[cfg(unix)]
        if s.port < 1024 {
            tracing::warn!("Using privileged port {} - may require elevated permissions", s.port);
        }
        if non_empty_path(&s.database).is_none() {
            return Err(ConfigError::Missing(keys::DATABASE));
        }
        if non_empty_path(&s.generated).is_none() {
            return Err(ConfigError::Missing(keys::GENERATED));
        }
        if s.session_max_age_secs == 0 {
            return Err(ConfigError::Invalid("session_max_age_secs must be > 0".to_string()));
        }
        Ok(())
    }

    /// Persists the settings to the config file, leaving out keys that came from the environment.
    pub fn write(&self) -> Result<(), ConfigError> {
        let path = self.config_file().ok_or(ConfigError::NoConfigFile)?;
        let mut value = toml::Value::try_from(self.settings())?;
        if let Some(table) = value.as_table_mut() {
            for key in &self.overrides {
                table.remove(key);
            }
        }
        let body = toml::to_string_pretty(&value)?;
        std::fs::write(&path, body).map_err(|source| ConfigError::Write { path, source })
    }
}

fn env_override_keys(prefix: &str) -> HashSet<String> {
    let head = format!("{}_", prefix.to_uppercase());
    std::env::vars()
        .filter_map(|(k, v)| {
            if v.is_empty() {
                return None;
            }
            k.strip_prefix(&head).map(str::to_lowercase)
        })
        .filter(|k| k != "config")
        .collect()
}
