use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A handle to a running background job.
#[derive(Clone)]
pub struct JobHandle {
    pub description: String,
    /// Cancelled on shutdown; jobs should stop at the next convenient point.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub description: String,
}

/// Registry of background tasks started by the server.
#[derive(Clone, Default)]
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<Uuid, JobHandle>>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `job` on the runtime. The job is removed from the registry when it returns.
    pub async fn spawn<F, Fut>(&self, description: impl Into<String>, job: F) -> Uuid
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let description = description.into();
        tracing::debug!("starting job {} ({})", id, description);

        self.jobs.write().await.insert(id, JobHandle { description, cancel: cancel.clone() });

        let fut = job(cancel);
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            fut.await;
            jobs.write().await.remove(&id);
        });
        id
    }

    pub async fn list(&self) -> Vec<JobSummary> {
        self.jobs
            .read()
            .await
            .iter()
            .map(|(id, h)| JobSummary { id: *id, description: h.description.clone() })
            .collect()
    }

    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.jobs.read().await.get(&id) {
            Some(h) => {
                h.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Signals every running job to stop. Returns how many were signalled.
    pub async fn stop_all(&self) -> usize {
        let jobs = self.jobs.read().await;
        for h in jobs.values() {
            h.cancel.cancel();
        }
        jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}
