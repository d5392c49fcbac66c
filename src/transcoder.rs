//! Finds the `ffmpeg`/`ffprobe` pair, downloading it when it is missing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[cfg(windows)]
const EXE_SUFFIX: &str = ".exe";
#[cfg(not(windows))]
const EXE_SUFFIX: &str = "";

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

#[derive(Debug, Error)]
pub enum TranscoderError {
    #[error("missing ffmpeg and/or ffprobe")]
    Missing,
    #[error("no download URL configured for {0}")]
    NoDownloadUrl(&'static str),
    #[error("download of {url} failed: {source}")]
    Download { url: String, source: reqwest::Error },
    #[error("I/O error writing {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscoderPaths {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
}

impl TranscoderPaths {
    pub fn is_complete(&self) -> bool {
        self.ffmpeg.is_some() && self.ffprobe.is_some()
    }

    pub fn validate(&self) -> Result<(), TranscoderError> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(TranscoderError::Missing)
        }
    }
}

/// Platform file name of a transcoder binary.
pub fn binary_name(name: &str) -> String {
    format!("{}{}", name, EXE_SUFFIX)
}

fn find_binary(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let file = binary_name(name);
    dirs.iter().map(|d| d.join(&file)).find(|p| p.is_file())
}

/// `dirs` followed by every entry of `PATH`.
pub fn with_system_path(mut dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    if let Some(p) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&p));
    }
    dirs
}

/// Searches `dirs` in order; the first directory holding a binary wins.
pub fn find_paths(dirs: &[PathBuf]) -> TranscoderPaths {
    TranscoderPaths { ffmpeg: find_binary(FFMPEG, dirs), ffprobe: find_binary(FFPROBE, dirs) }
}

/// Fetches the transcoder binaries into a directory.
#[async_trait]
pub trait TranscoderAcquirer: Send + Sync {
    async fn acquire(&self, dest: &Path) -> Result<(), TranscoderError>;
}

/// Downloads each binary from a configured URL.
pub struct HttpDownloader {
    client: reqwest::Client,
    ffmpeg_url: Option<String>,
    ffprobe_url: Option<String>,
}

impl HttpDownloader {
    pub fn new(ffmpeg_url: Option<String>, ffprobe_url: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), ffmpeg_url, ffprobe_url }
    }

    async fn fetch(&self, url: &str, target: &Path) -> Result<(), TranscoderError> {
        let download_err = |source| TranscoderError::Download { url: url.to_string(), source };
        let io_err = |source| TranscoderError::Io { path: target.to_path_buf(), source };

        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download_err)?;

        // write next to the target and rename, so a half-downloaded binary is never picked up
        let mut partial = target.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let mut file = tokio::fs::File::create(&partial).await.map_err(io_err)?;
        while let Some(chunk) = resp.chunk().await.map_err(download_err)? {
            file.write_all(&chunk).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(io_err)?;
        }
        tokio::fs::rename(&partial, target).await.map_err(io_err)
    }
}

#[async_trait]
impl TranscoderAcquirer for HttpDownloader {
    async fn acquire(&self, dest: &Path) -> Result<(), TranscoderError> {
        let ffmpeg_url = self.ffmpeg_url.as_deref().ok_or(TranscoderError::NoDownloadUrl(FFMPEG))?;
        let ffprobe_url = self.ffprobe_url.as_deref().ok_or(TranscoderError::NoDownloadUrl(FFPROBE))?;

        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|source| TranscoderError::Io { path: dest.to_path_buf(), source })?;

        tracing::info!("Downloading {} from {}", FFMPEG, ffmpeg_url);
        self.fetch(ffmpeg_url, &dest.join(binary_name(FFMPEG))).await?;
        tracing::info!("Downloading {} from {}", FFPROBE, ffprobe_url);
        self.fetch(ffprobe_url, &dest.join(binary_name(FFPROBE))).await?;
        Ok(())
    }
}

/// Resolves the binaries from `search_dirs`, acquiring them into `download_dir`
/// when either one is missing.
pub async fn locate_or_acquire(
    search_dirs: &[PathBuf],
    download_dir: &Path,
    acquirer: &dyn TranscoderAcquirer,
) -> Result<TranscoderPaths, TranscoderError> {
    let found = find_paths(search_dirs);
    if found.is_complete() {
        return Ok(found);
    }

    tracing::info!("couldn't find FFMPEG, attempting to download it");
    if let Err(e) = acquirer.acquire(download_dir).await {
        tracing::error!(
            "Unable to locate / automatically download FFMPEG. \
             The ffmpeg and ffprobe binaries should be placed in {}. The error was: {}",
            download_dir.display(),
            e
        );
        return Err(e);
    }

    let found = find_paths(search_dirs);
    found.validate()?;
    Ok(found)
}
