use std::sync::Arc;

use crate::manager::Manager;

/// The shared application state handed to every handler and middleware.
///
/// The manager is the only process-wide context; everything else (config,
/// database, sessions, metrics) is reached through it.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
}

impl AppState {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }
}
