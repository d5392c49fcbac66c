use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle counters for monitoring
#[derive(Clone)]
pub struct Metrics {
    pub migrations_run: Arc<AtomicUsize>,
    pub migrations_failed: Arc<AtomicUsize>,
    pub restores: Arc<AtomicUsize>,
    pub post_migrate_runs: Arc<AtomicUsize>,
    pub setups_completed: Arc<AtomicUsize>,
    pub external_access_rejected: Arc<AtomicUsize>,
    pub temp_cleanups_deferred: Arc<AtomicUsize>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            migrations_run: Arc::new(AtomicUsize::new(0)),
            migrations_failed: Arc::new(AtomicUsize::new(0)),
            restores: Arc::new(AtomicUsize::new(0)),
            post_migrate_runs: Arc::new(AtomicUsize::new(0)),
            setups_completed: Arc::new(AtomicUsize::new(0)),
            external_access_rejected: Arc::new(AtomicUsize::new(0)),
            temp_cleanups_deferred: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_migrations_run(&self) {
        self.migrations_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_migrations_failed(&self) {
        self.migrations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_restores(&self) {
        self.restores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_post_migrate_runs(&self) {
        self.post_migrate_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_setups_completed(&self) {
        self.setups_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_external_access_rejected(&self) {
        self.external_access_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_temp_cleanups_deferred(&self) {
        self.temp_cleanups_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            migrations_run: self.migrations_run.load(Ordering::Relaxed),
            migrations_failed: self.migrations_failed.load(Ordering::Relaxed),
            restores: self.restores.load(Ordering::Relaxed),
            post_migrate_runs: self.post_migrate_runs.load(Ordering::Relaxed),
            setups_completed: self.setups_completed.load(Ordering::Relaxed),
            external_access_rejected: self.external_access_rejected.load(Ordering::Relaxed),
            temp_cleanups_deferred: self.temp_cleanups_deferred.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub migrations_run: usize,
    pub migrations_failed: usize,
    pub restores: usize,
    pub post_migrate_runs: usize,
    pub setups_completed: usize,
    pub external_access_rejected: usize,
    pub temp_cleanups_deferred: usize,
    pub uptime_seconds: u64,
}
