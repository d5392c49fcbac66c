use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;

/// Boundary to the DLNA/streaming implementation.
pub trait StreamingService: Send + Sync {
    fn start(&self) -> anyhow::Result<()>;
    fn stop(&self);
    fn is_running(&self) -> bool;
}

/// Tracks whether the DLNA server should be answering. The protocol side
/// subscribes to this state.
pub struct DlnaService {
    config: Arc<Config>,
    running: AtomicBool,
}

impl DlnaService {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config, running: AtomicBool::new(false) }
    }
}

impl StreamingService for DlnaService {
    fn start(&self) -> anyhow::Result<()> {
        if self.config.settings().libraries.is_empty() {
            anyhow::bail!("no libraries configured to serve");
        }
        if !self.running.swap(true, Ordering::SeqCst) {
            tracing::info!("DLNA service started");
        }
        Ok(())
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("DLNA service stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
