use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::store::{JobStore, StoreError};
use crate::models::generation::{FieldError, GenerationLimits, GenerationRequest};
use crate::models::job::{GenerationInput, GenerationJob, JobPatch};
use crate::services::backend::decodable_format;
use crate::services::queue::{JobDispatcher, QueueError, QueuedJob};
use crate::services::storage::{BlobStore, StorageError};

const MAX_TEXT_CHARS: usize = 1000;

/// Message stored on a job whose dispatch failed.
pub const DISPATCH_FAILED_MESSAGE: &str = "The job could not be scheduled for generation";

/// Raw bytes of an uploaded source image.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
}

/// Everything a client sent for one generation request.
#[derive(Debug, Clone)]
pub struct Submission {
    pub text: Option<String>,
    pub image: Option<ImageUpload>,
    pub parameters: GenerationRequest,
}

/// Validates generation requests, records them as pending jobs and hands
/// them to the dispatcher. Never waits for generation.
pub struct SubmissionService {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn BlobStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    limits: GenerationLimits,
}

enum CheckedInput {
    Text(String),
    Image {
        bytes: Vec<u8>,
        format: image::ImageFormat,
    },
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn BlobStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        limits: GenerationLimits,
    ) -> Self {
        Self {
            store,
            storage,
            dispatcher,
            limits,
        }
    }

    pub async fn submit(&self, submission: Submission) -> Result<Uuid, SubmitError> {
        let input = check_input(submission.text, submission.image)?;
        let parameters = submission.parameters.validate_against(&self.limits)?;

        let job_id = Uuid::new_v4();

        // Source bytes go to storage before any record can reference them.
        let input = match input {
            CheckedInput::Text(text) => GenerationInput::Text { text },
            CheckedInput::Image { bytes, format } => {
                let extension = format.extensions_str().first().copied().unwrap_or("bin");
                let image_key = format!("uploads/{job_id}.{extension}");
                self.storage
                    .upload(&image_key, &bytes, format.to_mime_type())
                    .await?;
                GenerationInput::Image { image_key }
            }
        };

        let job = GenerationJob::new_pending(job_id, input.clone(), parameters.clone(), Utc::now());
        if let Err(e) = self.store.create(&job).await {
            if let StoreError::DuplicateId(id) = &e {
                tracing::error!(job_id = %id, "Generated job id collided with an existing job");
            }
            // No record will ever reference the uploaded source.
            if let GenerationInput::Image { image_key } = &input {
                if let Err(cleanup) = self.storage.delete(image_key).await {
                    tracing::warn!(
                        image_key = %image_key,
                        error = %cleanup,
                        "Failed to remove orphaned upload"
                    );
                }
            }
            return Err(e.into());
        }

        let queued = QueuedJob {
            job_id,
            input,
            parameters,
        };

        if let Err(e) = self.dispatcher.enqueue(&queued).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to enqueue generation job");
            let patch = JobPatch::Fail {
                error: DISPATCH_FAILED_MESSAGE.to_string(),
                at: Utc::now(),
            };
            if let Err(store_err) = self.store.update(job_id, patch).await {
                tracing::error!(
                    job_id = %job_id,
                    error = %store_err,
                    "Failed to mark undispatched job as failed"
                );
            }
            return Err(SubmitError::Dispatch(e));
        }

        metrics::counter!("generation_jobs_submitted_total", "input" => queued.input.kind())
            .increment(1);

        tracing::info!(
            job_id = %job_id,
            input = queued.input.kind(),
            style = %queued.parameters.style,
            resolution = %queued.parameters.resolution,
            batch_count = queued.parameters.batch_count,
            "Generation job submitted"
        );

        Ok(job_id)
    }
}

fn check_input(
    text: Option<String>,
    image: Option<ImageUpload>,
) -> Result<CheckedInput, FieldError> {
    let text = text.filter(|t| !t.is_empty());
    match (text, image) {
        (Some(_), Some(_)) => Err(FieldError::new(
            "input",
            "provide either text or an image, not both",
        )),
        (None, None) => Err(FieldError::new("input", "provide either text or an image")),
        (Some(text), None) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(FieldError::new("text", "must not be blank"));
            }
            if trimmed.chars().count() > MAX_TEXT_CHARS {
                return Err(FieldError::new(
                    "text",
                    format!("must be at most {MAX_TEXT_CHARS} characters"),
                ));
            }
            Ok(CheckedInput::Text(trimmed.to_string()))
        }
        (None, Some(upload)) => {
            if upload.bytes.is_empty() {
                return Err(FieldError::new("image", "uploaded file is empty"));
            }
            let format = decodable_format(&upload.bytes)
                .ok_or_else(|| FieldError::new("image", "unsupported image format"))?;
            Ok(CheckedInput::Image {
                bytes: upload.bytes,
                format,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Validation failed: {0}")]
    Validation(#[from] FieldError),

    #[error("Failed to store uploaded image: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to dispatch job: {0}")]
    Dispatch(#[from] QueueError),
}
