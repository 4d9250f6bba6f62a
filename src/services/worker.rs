//! Executes one processing pass for a dequeued job and records the result.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::db::store::{JobStore, StoreError};
use crate::models::job::{GenerationInput, JobOutput, JobPatch, JobStatus};
use crate::services::backend::{
    GeneratedImage, GenerationBackend, GenerationError, InferenceInput, InferenceRequest,
    ProgressReporter,
};
use crate::services::queue::QueuedJob;
use crate::services::storage::BlobStore;

const SOURCE_UNAVAILABLE_MESSAGE: &str = "The uploaded image could not be read";
const OUTPUT_NOT_STORED_MESSAGE: &str = "The generated images could not be saved";
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// How a processing pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// Job was not ours to run: redelivered, already finished, or reaped.
    Skipped(JobStatus),
}

/// Worker side of the job lifecycle. Holds the backend for the life of the
/// worker process.
pub struct GenerationWorker {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn BlobStore>,
    backend: Arc<dyn GenerationBackend>,
    max_attempts: u32,
    retry_backoff: Duration,
}

/// Failure before any terminal status could be recorded.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

/// Writes backend progress through to the job record.
struct StoreProgress {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
}

#[async_trait]
impl ProgressReporter for StoreProgress {
    async fn report(&self, fraction: f64) {
        if let Err(e) = self
            .store
            .update(self.job_id, JobPatch::Progress { fraction })
            .await
        {
            tracing::debug!(job_id = %self.job_id, error = %e, "Progress update not recorded");
        }
    }
}

impl GenerationWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn BlobStore>,
        backend: Arc<dyn GenerationBackend>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            storage,
            backend,
            max_attempts: max_attempts.max(1),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Delay before the first retry; doubles for each further attempt.
    pub fn with_retry_backoff(mut self, base: Duration) -> Self {
        self.retry_backoff = base;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt - 1).min(16);
        self.retry_backoff.saturating_mul(factor).min(MAX_RETRY_BACKOFF)
    }

    pub async fn process(&self, job: &QueuedJob) -> Result<JobOutcome, WorkerError> {
        let job_id = job.job_id;

        match self.store.update(job_id, JobPatch::Start { at: Utc::now() }).await {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { source, .. }) => {
                tracing::error!(
                    job_id = %job_id,
                    status = %source.from,
                    "Job is not pending, skipping"
                );
                return Ok(JobOutcome::Skipped(source.from));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(job_id = %job_id, input = job.input.kind(), "Processing generation job");
        let started = Instant::now();

        let outcome = match self.run(job).await {
            Ok(keys) => {
                self.finish(
                    job_id,
                    JobPatch::Complete {
                        output: JobOutput::from_keys(keys),
                        at: Utc::now(),
                    },
                )
                .await?
            }
            Err(message) => {
                self.finish(
                    job_id,
                    JobPatch::Fail {
                        error: message.to_string(),
                        at: Utc::now(),
                    },
                )
                .await?
            }
        };

        let elapsed = started.elapsed();
        metrics::histogram!("generation_processing_seconds").record(elapsed.as_secs_f64());
        match outcome {
            JobOutcome::Completed => {
                metrics::counter!("generation_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job_id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
            }
            JobOutcome::Failed => {
                metrics::counter!("generation_jobs_failed_total").increment(1);
            }
            JobOutcome::Skipped(_) => {}
        }

        Ok(outcome)
    }

    /// Returns the stored output keys, or a user-safe failure message.
    async fn run(&self, job: &QueuedJob) -> Result<Vec<String>, &'static str> {
        let input = match &job.input {
            GenerationInput::Text { text } => InferenceInput::Text(text.clone()),
            GenerationInput::Image { image_key } => match self.storage.download(image_key).await {
                Ok(bytes) => InferenceInput::Image(bytes),
                Err(e) => {
                    tracing::error!(
                        job_id = %job.job_id,
                        image_key = %image_key,
                        error = %e,
                        "Failed to download source image"
                    );
                    return Err(SOURCE_UNAVAILABLE_MESSAGE);
                }
            },
        };

        let request = InferenceRequest {
            input,
            parameters: job.parameters.clone(),
        };

        let images = self.generate(job.job_id, &request).await.map_err(|e| {
            tracing::error!(job_id = %job.job_id, error = %e, "Generation failed");
            e.user_message()
        })?;

        let mut keys = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            let key = format!("outputs/{}/{}.{}", job.job_id, index, image.extension());
            if let Err(e) = self
                .storage
                .upload(&key, &image.bytes, image.content_type())
                .await
            {
                tracing::error!(job_id = %job.job_id, key = %key, error = %e, "Failed to store output");
                return Err(OUTPUT_NOT_STORED_MESSAGE);
            }
            keys.push(key);
        }

        Ok(keys)
    }

    /// Invoke the backend, retrying retryable failures within this pass.
    async fn generate(
        &self,
        job_id: Uuid,
        request: &InferenceRequest,
    ) -> Result<Vec<GeneratedImage>, GenerationError> {
        let progress = StoreProgress {
            store: self.store.clone(),
            job_id,
        };

        let mut attempt = 1;
        loop {
            match self.backend.infer(request, &progress).await {
                Ok(images) => {
                    let expected = request.parameters.batch_count as usize;
                    if images.len() != expected {
                        return Err(GenerationError::MalformedOutput(format!(
                            "expected {expected} images, got {}",
                            images.len()
                        )));
                    }
                    return Ok(images);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        job_id = %job_id,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Generation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn finish(&self, job_id: Uuid, patch: JobPatch) -> Result<JobOutcome, WorkerError> {
        let target = patch.target_status();
        match self.store.update(job_id, patch).await {
            Ok(_) if target == JobStatus::Completed => Ok(JobOutcome::Completed),
            Ok(_) => Ok(JobOutcome::Failed),
            Err(StoreError::InvalidTransition { source, .. }) => {
                tracing::error!(
                    job_id = %job_id,
                    status = %source.from,
                    target = %target,
                    "Job changed state while processing; result discarded"
                );
                Ok(JobOutcome::Skipped(source.from))
            }
            Err(e) => Err(e.into()),
        }
    }
}
