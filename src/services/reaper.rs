use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::store::{JobFilter, JobStore, StoreError};
use crate::models::job::{JobPatch, JobStatus};
use crate::services::queue::{JobDispatcher, QueuedJob};

/// Message stored on jobs failed by the reaper.
pub const TIMEOUT_MESSAGE: &str = "Generation timed out and was abandoned";

/// Fails jobs that have been `processing` for longer than `timeout`, which
/// happens when a worker dies mid-job.
pub struct Reaper {
    store: Arc<dyn JobStore>,
    queue: Option<Arc<dyn JobDispatcher>>,
    timeout: Duration,
}

impl Reaper {
    pub fn new(store: Arc<dyn JobStore>, timeout: Duration) -> Self {
        Self {
            store,
            queue: None,
            timeout,
        }
    }

    /// Also drop the queue payloads of reaped jobs, which a dead worker
    /// left behind in the processing list.
    pub fn with_queue(mut self, queue: Arc<dyn JobDispatcher>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// One sweep. Returns the ids of the jobs it failed.
    pub async fn reap_once(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(timeout).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stuck = self
            .store
            .list(&JobFilter {
                status: Some(JobStatus::Processing),
                started_before: Some(cutoff),
                ..Default::default()
            })
            .await?;

        let mut reaped = Vec::new();
        for job in stuck {
            let patch = JobPatch::Fail {
                error: TIMEOUT_MESSAGE.to_string(),
                at: now,
            };
            match self.store.update(job.id, patch).await {
                Ok(_) => {
                    tracing::warn!(
                        job_id = %job.id,
                        started_at = ?job.started_at,
                        "Reaped job stuck in processing"
                    );
                    if let Some(queue) = &self.queue {
                        if let Err(e) = queue.complete(&QueuedJob::from(&job)).await {
                            tracing::warn!(
                                job_id = %job.id,
                                error = %e,
                                "Failed to release queue entry of reaped job"
                            );
                        }
                    }
                    reaped.push(job.id);
                }
                // Finished between the list and the update.
                Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if !reaped.is_empty() {
            metrics::counter!("generation_jobs_reaped_total").increment(reaped.len() as u64);
        }

        Ok(reaped)
    }

    /// Sweep every `interval` until the task is aborted.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.reap_once(Utc::now()).await {
                tracing::error!(error = %e, "Reaper sweep failed");
            }
        }
    }
}
