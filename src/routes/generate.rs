use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::generation::{
    FieldError, GenerationRequest, SubmitResponse, TextGenerationBody,
};
use crate::models::job::JobStatus;
use crate::services::submission::{ImageUpload, Submission};

/// POST /generate/text: queue a text-to-pixel-art job.
pub async fn submit_text(
    State(state): State<AppState>,
    payload: Result<Json<TextGenerationBody>, JsonRejection>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(body) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let submission = Submission {
        text: body.text,
        image: None,
        parameters: body.parameters,
    };

    accepted(&state, submission).await
}

/// POST /generate/image: queue an image-to-pixel-art job from a multipart
/// upload (`image` file plus parameter fields).
pub async fn submit_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut image: Option<ImageUpload> = None;
    let mut text = None;
    let mut style = None;
    let mut resolution = None;
    let mut color_palette = None;
    let mut batch_count = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                // Browsers send an empty part when no file was chosen.
                if !data.is_empty() {
                    image = Some(ImageUpload {
                        bytes: data.to_vec(),
                    });
                }
            }
            "text" | "style" | "resolution" | "color_palette" | "batch_count" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                match name.as_str() {
                    "text" => text = Some(value),
                    "style" => style = Some(value),
                    "resolution" => resolution = Some(value),
                    "color_palette" => color_palette = Some(value),
                    _ => batch_count = Some(value),
                }
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown form field");
            }
        }
    }

    let batch_count = match batch_count.as_deref().map(str::trim) {
        None | Some("") => 1,
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| FieldError::new("batch_count", "must be an integer"))?,
    };

    let parameters = GenerationRequest {
        style: required("style", style)?,
        resolution: required("resolution", resolution)?,
        color_palette: required("color_palette", color_palette)?,
        batch_count,
    };

    let submission = Submission {
        text,
        image,
        parameters,
    };

    accepted(&state, submission).await
}

fn required(field: &str, value: Option<String>) -> Result<String, FieldError> {
    value.ok_or_else(|| FieldError::new(field, "is required"))
}

async fn accepted(
    state: &AppState,
    submission: Submission,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let job_id = state.submission.submit(submission).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Pending,
        }),
    ))
}
