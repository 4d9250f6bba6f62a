use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::store::{JobFilter, JobStore, StoreError};
use crate::models::generation::{HistoryEntry, JobView};
use crate::models::job::{GenerationInput, GenerationJob, JobOutput, JobStatus};
use crate::services::storage::public_url;

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

/// Read-only lookups for polling clients.
pub struct StatusService {
    store: Arc<dyn JobStore>,
    asset_base_url: String,
}

impl StatusService {
    pub fn new(store: Arc<dyn JobStore>, asset_base_url: String) -> Self {
        Self {
            store,
            asset_base_url,
        }
    }

    pub async fn get_status(&self, id: Uuid) -> Result<JobView, StoreError> {
        let job = self.store.get(id).await?;
        Ok(self.view(&job))
    }

    /// Most recent jobs first.
    pub async fn history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StoreError> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);

        let filter = JobFilter {
            status: query.status,
            limit: Some(limit),
            newest_first: true,
            ..Default::default()
        };
        let jobs = self.store.list(&filter).await?;

        Ok(jobs
            .iter()
            .map(|job| HistoryEntry {
                view: self.view(job),
                input_kind: job.input.kind().to_string(),
                text: match &job.input {
                    GenerationInput::Text { text } => Some(text.clone()),
                    GenerationInput::Image { .. } => None,
                },
                parameters: job.parameters.clone(),
            })
            .collect())
    }

    fn view(&self, job: &GenerationJob) -> JobView {
        let (result_url, result_urls) = match &job.output {
            Some(JobOutput::Single(key)) => (Some(public_url(&self.asset_base_url, key)), None),
            Some(JobOutput::Batch(keys)) => (
                None,
                Some(
                    keys.iter()
                        .map(|k| public_url(&self.asset_base_url, k))
                        .collect(),
                ),
            ),
            None => (None, None),
        };

        JobView {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            result_url,
            result_urls,
            error: job.error.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}
