use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::generation::{HistoryResponse, JobView};
use crate::models::job::JobStatus;
use crate::services::export::{self, ExportFormat};
use crate::services::status::HistoryQuery;

/// GET /generation/{job_id}/status: poll a job.
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobView>> {
    let view = state.status.get_status(job_id).await?;
    Ok(Json(view))
}

/// GET /history: recent jobs, newest first.
pub async fn history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> AppResult<Json<HistoryResponse>> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let generations = state.status.history(&query).await?;
    Ok(Json(HistoryResponse { generations }))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub index: usize,
}

/// GET /generation/{job_id}/export: download one output image as PNG or SVG.
pub async fn export_image(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> AppResult<Response> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let job = state.store.get(job_id).await?;
    if job.status != JobStatus::Completed {
        return Err(AppError::Conflict(format!(
            "job {job_id} is {}, not completed",
            job.status
        )));
    }

    let key = job
        .output
        .as_ref()
        .and_then(|output| output.keys().get(query.index).map(|k| k.to_string()))
        .ok_or_else(|| {
            AppError::NotFound(format!("job {job_id} has no output #{}", query.index))
        })?;

    let stored = state
        .storage
        .download(&key)
        .await
        .map_err(|e| AppError::Internal(format!("failed to read {key}: {e}")))?;

    let exported = export::export(&stored, query.format)
        .map_err(|e| AppError::Internal(format!("failed to export {key}: {e}")))?;

    let disposition = format!(
        "attachment; filename=\"pixel-art-{job_id}-{}.{}\"",
        query.index, exported.extension
    );

    Ok((
        [
            (header::CONTENT_TYPE, exported.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        exported.bytes,
    )
        .into_response())
}
