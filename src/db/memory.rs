use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::store::{JobFilter, JobStore, StoreError};
use crate::models::job::{GenerationJob, JobPatch};

/// In-process job store for single-node runs and tests.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    order: Vec<Uuid>,
    jobs: HashMap<Uuid, GenerationJob>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &GenerationJob) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateId(job.id));
        }
        inner.order.push(job.id);
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<GenerationJob, StoreError> {
        self.inner
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> Result<GenerationJob, StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        // Patch a copy so a rejected patch leaves the stored record untouched.
        let mut job = stored.clone();
        job.apply(patch)
            .map_err(|source| StoreError::InvalidTransition { id, source })?;
        *stored = job.clone();

        Ok(job)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<GenerationJob>, StoreError> {
        let inner = self.inner.read().await;
        let ids: Box<dyn Iterator<Item = &Uuid> + '_> = if filter.newest_first {
            Box::new(inner.order.iter().rev())
        } else {
            Box::new(inner.order.iter())
        };
        let matching = ids
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| filter.matches(job))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matching)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
