//! Generation job record and its status state machine.
//!
//! ```text
//!   submit ──→ Pending ──→ Processing ──→ Completed
//!                 │             │
//!                 └─────────────┴──→ Failed(error)
//! ```
//!
//! Every mutation goes through [`GenerationJob::apply`], so all store
//! implementations enforce the same transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::models::generation::GenerationParameters;

/// Status of a generation job.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether a job may move from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// What a job generates from. Exactly one kind per job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationInput {
    Text { text: String },
    /// Blob-storage key of the uploaded source image.
    Image { image_key: String },
}

impl GenerationInput {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationInput::Text { .. } => "text",
            GenerationInput::Image { .. } => "image",
        }
    }
}

/// Blob-storage keys of the generated images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JobOutput {
    Single(String),
    Batch(Vec<String>),
}

impl JobOutput {
    /// A single key stays `Single`; anything else is a `Batch`.
    pub fn from_keys(mut keys: Vec<String>) -> Self {
        if keys.len() == 1 {
            JobOutput::Single(keys.remove(0))
        } else {
            JobOutput::Batch(keys)
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        match self {
            JobOutput::Single(key) => vec![key.as_str()],
            JobOutput::Batch(keys) => keys.iter().map(String::as_str).collect(),
        }
    }
}

/// A pixel-art generation job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationJob {
    pub id: Uuid,
    pub input: GenerationInput,
    pub parameters: GenerationParameters,
    pub status: JobStatus,
    pub progress: f64,
    pub output: Option<JobOutput>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A state change requested by the worker or the reaper.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPatch {
    Start { at: DateTime<Utc> },
    Progress { fraction: f64 },
    Complete { output: JobOutput, at: DateTime<Utc> },
    Fail { error: String, at: DateTime<Utc> },
}

impl JobPatch {
    pub fn target_status(&self) -> JobStatus {
        match self {
            JobPatch::Start { .. } | JobPatch::Progress { .. } => JobStatus::Processing,
            JobPatch::Complete { .. } => JobStatus::Completed,
            JobPatch::Fail { .. } => JobStatus::Failed,
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move job from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl GenerationJob {
    pub fn new_pending(
        id: Uuid,
        input: GenerationInput,
        parameters: GenerationParameters,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            input,
            parameters,
            status: JobStatus::Pending,
            progress: 0.0,
            output: None,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a patch in place. Nothing changes when the patch is rejected.
    pub fn apply(&mut self, patch: JobPatch) -> Result<(), TransitionError> {
        let to = patch.target_status();
        let rejected = TransitionError {
            from: self.status,
            to,
        };

        match patch {
            JobPatch::Start { at } => {
                if self.status != JobStatus::Pending {
                    return Err(rejected);
                }
                self.status = JobStatus::Processing;
                self.started_at = Some(at.max(self.created_at));
            }
            JobPatch::Progress { fraction } => {
                if self.status != JobStatus::Processing {
                    return Err(rejected);
                }
                let fraction = fraction.clamp(0.0, 1.0);
                // Late or out-of-order reports never move progress backwards.
                if fraction > self.progress {
                    self.progress = fraction;
                }
            }
            JobPatch::Complete { output, at } => {
                if !self.status.can_transition_to(to) {
                    return Err(rejected);
                }
                self.status = JobStatus::Completed;
                self.progress = 1.0;
                self.output = Some(output);
                self.error = None;
                self.completed_at = Some(at.max(self.last_timestamp()));
            }
            JobPatch::Fail { error, at } => {
                if !self.status.can_transition_to(to) {
                    return Err(rejected);
                }
                self.status = JobStatus::Failed;
                self.output = None;
                self.error = Some(error);
                self.completed_at = Some(at.max(self.last_timestamp()));
            }
        }

        Ok(())
    }

    fn last_timestamp(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.created_at)
    }
}
