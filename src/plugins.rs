//! Plugin and scraper descriptor caches.
//!
//! Only descriptor discovery lives here; executing plugins and scrapers is
//! somebody else's job. A broken descriptor is skipped with a warning, an
//! unreadable directory fails the whole load.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::Config;
use crate::session::SessionStore;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no directory configured for {0}")]
    NoDirectory(&'static str),
    #[error("could not read {path}: {source}")]
    Walk { path: PathBuf, source: walkdir::Error },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Descriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(skip)]
    pub path: PathBuf,
}

fn load_descriptors(dir: &Path) -> Result<Vec<Descriptor>, PluginError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(dir).max_depth(2).sort_by_file_name() {
        let entry = entry.map_err(|source| PluginError::Walk { path: dir.to_path_buf(), source })?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let parsed = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|s| toml::from_str::<Descriptor>(&s).map_err(anyhow::Error::from));
        match parsed {
            Ok(mut d) => {
                d.path = path.to_path_buf();
                out.push(d);
            }
            Err(e) => tracing::warn!("skipping descriptor {}: {}", path.display(), e),
        }
    }
    Ok(out)
}

fn resolve_dir(configured: Option<PathBuf>, config: &Config, default_name: &str) -> Option<PathBuf> {
    configured
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| config.config_dir().map(|d| d.join(default_name)))
}

pub struct PluginCache {
    config: Arc<Config>,
    plugins: RwLock<Vec<Descriptor>>,
    session_store: RwLock<Option<Arc<SessionStore>>>,
}

impl PluginCache {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config, plugins: RwLock::new(Vec::new()), session_store: RwLock::new(None) }
    }

    /// Plugins call back into the API with a session from this store.
    pub fn register_session_store(&self, store: Arc<SessionStore>) {
        *self.session_store.write().unwrap_or_else(|e| e.into_inner()) = Some(store);
    }

    pub fn session_store(&self) -> Option<Arc<SessionStore>> {
        self.session_store.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn directory(&self) -> Option<PathBuf> {
        resolve_dir(self.config.settings().plugins_path, &self.config, "plugins")
    }

    /// Re-reads every plugin descriptor. Returns the number loaded.
    pub fn load_plugins(&self) -> Result<usize, PluginError> {
        let dir = self.directory().ok_or(PluginError::NoDirectory("plugins"))?;
        let loaded = load_descriptors(&dir)?;
        let n = loaded.len();
        *self.plugins.write().unwrap_or_else(|e| e.into_inner()) = loaded;
        tracing::debug!("loaded {} plugins from {}", n, dir.display());
        Ok(n)
    }

    pub fn plugins(&self) -> Vec<Descriptor> {
        self.plugins.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Immutable snapshot of scraper descriptors; rebuilt wholesale on refresh.
#[derive(Debug, Default)]
pub struct ScraperCache {
    scrapers: Vec<Descriptor>,
}

impl ScraperCache {
    pub fn new(config: &Config) -> Result<Self, PluginError> {
        let dir = resolve_dir(config.settings().scrapers_path, config, "scrapers")
            .ok_or(PluginError::NoDirectory("scrapers"))?;
        Ok(Self { scrapers: load_descriptors(&dir)? })
    }

    pub fn scrapers(&self) -> &[Descriptor] {
        &self.scrapers
    }
}
