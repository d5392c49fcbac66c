//! # Mediathek Server Core
//!
//! Process lifecycle for the Mediathek media server: configuration, first-run
//! setup, safe schema migration of the library database, a live system status,
//! the public-exposure guard and orderly shutdown.
//!
//! ## Architecture
//!
//! - **Axum**: administrative HTTP API
//! - **SQLx**: SQLite library database
//! - **Tokio**: async runtime and background jobs
//! - **tracing**: logging and span-timing profiles
//!
//! ## Core Components
//!
//! - [`config`]: layered configuration (defaults, file, environment) and write-back
//! - [`paths`]: generated-content directory layout and provisioning
//! - [`db`]: database open/close, schema versions, backup and restore
//! - [`migration`]: backup-migrate-restore with post-migration hooks
//! - [`status`]: tri-state system status
//! - [`downloads`]: files staged for client downloads
//! - [`session`]: access guard and login sessions
//! - [`transcoder`]: locating or downloading the ffmpeg/ffprobe binaries
//! - [`manager`]: the orchestrator tying everything together
//! - [`routes`], [`middleware`], [`error`], [`state`]: HTTP surface

pub mod config;
pub mod db;
pub mod downloads;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod middleware;
pub mod migration;
pub mod paths;
pub mod plugins;
pub mod routes;
pub mod session;
pub mod state;
pub mod status;
pub mod streaming;
pub mod transcoder;

#[cfg(test)]
mod tests;
