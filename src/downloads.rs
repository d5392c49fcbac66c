//! Files staged under `generated/download_stage` for a single client download.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    pub content_type: String,
    /// Keep the file on disk after it was handed out.
    pub keep: bool,
    pub staged_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct StagedSummary {
    pub hash: String,
    pub path: PathBuf,
    pub content_type: String,
}

/// Registry of staged download files, keyed by an opaque hash.
#[derive(Clone, Default)]
pub struct DownloadStore {
    files: Arc<RwLock<HashMap<String, StagedFile>>>,
}

impl DownloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` and returns the hash a client fetches it with.
    pub fn register_file(&self, path: impl Into<PathBuf>, content_type: impl Into<String>, keep: bool) -> String {
        let hash = Uuid::new_v4().simple().to_string();
        let file = StagedFile { path: path.into(), content_type: content_type.into(), keep, staged_at: Instant::now() };
        tracing::debug!("staged download {} -> {}", hash, file.path.display());
        self.files.write().unwrap_or_else(|e| e.into_inner()).insert(hash.clone(), file);
        hash
    }

    pub fn get(&self, hash: &str) -> Option<StagedFile> {
        self.files.read().unwrap_or_else(|e| e.into_inner()).get(hash).cloned()
    }

    /// Hands the file out once. Unless it was registered with `keep`, the
    /// entry is forgotten and the file deleted.
    pub fn take(&self, hash: &str) -> Option<StagedFile> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        let file = files.get(hash)?.clone();
        if !file.keep {
            files.remove(hash);
            remove_staged(&file.path);
        }
        Some(file)
    }

    /// Drops entries older than `max_age`, deleting their files unless kept.
    pub fn expire(&self, max_age: Duration) -> usize {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        let before = files.len();
        files.retain(|_, f| {
            if f.staged_at.elapsed() < max_age {
                return true;
            }
            if !f.keep {
                remove_staged(&f.path);
            }
            false
        });
        before - files.len()
    }

    /// Forgets every entry without touching disk. Used before the staging
    /// directory itself is emptied.
    pub fn clear(&self) -> usize {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        let n = files.len();
        files.clear();
        n
    }

    pub fn list(&self) -> Vec<StagedSummary> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(hash, f)| StagedSummary {
                hash: hash.clone(),
                path: f.path.clone(),
                content_type: f.content_type.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remove_staged(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("could not delete staged download {}: {}", path.display(), e),
    }
}
