//! Generated-content directory layout and small filesystem helpers.

use std::io;
use std::path::{Path, PathBuf};

/// Name of the per-user data directory under `$HOME`.
pub const HOME_DIR_NAME: &str = ".mediathek";

/// `~/.mediathek`, if a home directory can be determined.
pub fn home_directory() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(HOME_DIR_NAME))
}

/// Directories below the `generated` root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPaths {
    pub root: PathBuf,
    pub screenshots: PathBuf,
    pub vtt: PathBuf,
    pub markers: PathBuf,
    pub transcodes: PathBuf,
    pub downloads: PathBuf,
    pub interactive_heatmap: PathBuf,
    pub tmp: PathBuf,
}

impl GeneratedPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            screenshots: root.join("screenshots"),
            vtt: root.join("vtt"),
            markers: root.join("markers"),
            transcodes: root.join("transcodes"),
            downloads: root.join("download_stage"),
            interactive_heatmap: root.join("interactive_heatmaps"),
            tmp: root.join("tmp"),
            root,
        }
    }

    /// Every directory that has to exist before dependents touch it, with a display label.
    pub fn required(&self) -> [(&'static str, &Path); 7] {
        [
            ("Screenshots", &self.screenshots),
            ("VTT", &self.vtt),
            ("Markers", &self.markers),
            ("Transcodes", &self.transcodes),
            ("Downloads", &self.downloads),
            ("Interactive Heatmaps", &self.interactive_heatmap),
            ("Tmp", &self.tmp),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub generated: GeneratedPaths,
}

impl Paths {
    pub fn new(generated_root: impl Into<PathBuf>) -> Self {
        Self { generated: GeneratedPaths::new(generated_root) }
    }

    /// Creates every required directory. Failures are logged per directory and
    /// do not stop the others.
    pub fn provision(&self) -> usize {
        let mut failures = 0;
        for (label, dir) in self.generated.required() {
            if let Err(e) = ensure_dir(dir) {
                tracing::warn!("could not create directory for {}: {}", label, e);
                failures += 1;
            }
        }
        failures
    }
}

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Removes everything inside `path`, keeping the directory itself.
/// A missing directory counts as empty.
pub fn empty_dir(path: &Path) -> io::Result<()> {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let p = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&p)?;
        } else {
            std::fs::remove_file(&p)?;
        }
    }
    Ok(())
}

/// Creates `path` if missing without truncating an existing file.
pub fn touch(path: &Path) -> io::Result<()> {
    std::fs::OpenOptions::new().create(true).append(true).open(path).map(|_| ())
}
