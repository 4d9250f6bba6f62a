use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::job::{GenerationJob, JobPatch, JobStatus, TransitionError};

/// Durable record of generation jobs, keyed by job ID.
///
/// `update` is atomic per record: readers observe a job either before or
/// after a patch, never in between.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &GenerationJob) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<GenerationJob, StoreError>;

    /// Apply a patch and return the job as stored afterwards.
    async fn update(&self, id: Uuid, patch: JobPatch) -> Result<GenerationJob, StoreError>;

    /// Jobs matching `filter`, in insertion order (or reversed when
    /// `newest_first` is set), at most `limit` of them.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<GenerationJob>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    /// Only jobs whose `started_at` is strictly before this instant.
    pub started_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub newest_first: bool,
}

impl JobFilter {
    pub fn matches(&self, job: &GenerationJob) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(cutoff) = self.started_before {
            match job.started_at {
                Some(started) if started < cutoff => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} already exists")]
    DuplicateId(Uuid),

    #[error("job {id}: {source}")]
    InvalidTransition {
        id: Uuid,
        #[source]
        source: TransitionError,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored job is unreadable: {0}")]
    Corrupt(String),
}
