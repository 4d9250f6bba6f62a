use std::sync::Arc;

use crate::db::store::JobStore;
use crate::models::generation::GenerationLimits;
use crate::services::{
    queue::JobDispatcher, status::StatusService, storage::BlobStore,
    submission::SubmissionService,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub storage: Arc<dyn BlobStore>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub submission: Arc<SubmissionService>,
    pub status: Arc<StatusService>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn BlobStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        limits: GenerationLimits,
        asset_base_url: String,
    ) -> Self {
        let submission = SubmissionService::new(
            store.clone(),
            storage.clone(),
            dispatcher.clone(),
            limits,
        );
        let status = StatusService::new(store.clone(), asset_base_url);

        Self {
            store,
            storage,
            dispatcher,
            submission: Arc::new(submission),
            status: Arc::new(status),
        }
    }
}
