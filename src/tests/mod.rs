//! Tests for the Mediathek server core.
//!
//! - **config_tests**: layering, validation and write-back
//! - **db_tests**: open, schema versions, backup and restore
//! - **migration_tests**: backup-migrate-restore and hooks
//! - **status_tests**: tri-state status
//! - **guard_tests**: access guard and tripwire
//! - **session_tests**: login sessions
//! - **manager_tests**: run-once init, setup flow, shutdown codes
//! - **api_tests**: HTTP surface end to end
//! - **support_tests**: paths, transcoder, plugins and jobs
//!
//! Shared fixtures live in `fixtures`.

pub mod guard_tests;
pub mod manager_tests;
pub mod status_tests;
