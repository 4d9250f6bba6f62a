use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::app_state::AppState;

pub mod generate;
pub mod generation;
pub mod health;
pub mod metrics;

/// API routes. Uploads larger than `max_upload_bytes` are rejected.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/generate/text", post(generate::submit_text))
        .route("/generate/image", post(generate::submit_image))
        .route("/generation/{job_id}/status", get(generation::get_status))
        .route("/generation/{job_id}/export", get(generation::export_image))
        .route("/history", get(generation::history))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}
