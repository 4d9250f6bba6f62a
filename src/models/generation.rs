use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobStatus;

/// Allowed parameter values, supplied by configuration.
#[derive(Debug, Clone)]
pub struct GenerationLimits {
    pub styles: Vec<String>,
    pub resolutions: Vec<String>,
    pub color_palettes: Vec<String>,
    pub max_batch_count: u32,
}

/// Generation parameters as submitted by a client (JSON body or form fields).
#[derive(Debug, Clone, Deserialize, Validate)]
#[garde(context(GenerationLimits))]
pub struct GenerationRequest {
    #[garde(custom(allowed_style))]
    pub style: String,

    #[garde(custom(allowed_resolution))]
    pub resolution: String,

    #[garde(custom(allowed_color_palette))]
    pub color_palette: String,

    #[serde(default = "default_batch_count")]
    #[garde(custom(batch_count_in_range))]
    pub batch_count: i64,
}

fn default_batch_count() -> i64 {
    1
}

fn allowed_style(value: &str, limits: &GenerationLimits) -> garde::Result {
    one_of(value, &limits.styles)
}

fn allowed_resolution(value: &str, limits: &GenerationLimits) -> garde::Result {
    one_of(value, &limits.resolutions)
}

fn allowed_color_palette(value: &str, limits: &GenerationLimits) -> garde::Result {
    one_of(value, &limits.color_palettes)
}

fn one_of(value: &str, allowed: &[String]) -> garde::Result {
    if allowed.iter().any(|a| a == value) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "'{value}' is not one of: {}",
            allowed.join(", ")
        )))
    }
}

fn batch_count_in_range(value: &i64, limits: &GenerationLimits) -> garde::Result {
    let max = i64::from(limits.max_batch_count);
    if (1..=max).contains(value) {
        Ok(())
    } else {
        Err(garde::Error::new(format!("must be between 1 and {max}")))
    }
}

/// A client input error naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl GenerationRequest {
    /// Check against the configured limits, reporting the first bad field.
    pub fn validate_against(
        &self,
        limits: &GenerationLimits,
    ) -> Result<GenerationParameters, FieldError> {
        if let Err(report) = self.validate_with(limits) {
            let (field, message) = report
                .iter()
                .next()
                .map(|(path, error)| (path.to_string(), error.message().to_string()))
                .unwrap_or_else(|| ("parameters".to_string(), "invalid".to_string()));
            return Err(FieldError::new(field, message));
        }

        let batch_count = u32::try_from(self.batch_count)
            .map_err(|_| FieldError::new("batch_count", "out of range"))?;

        Ok(GenerationParameters {
            style: self.style.clone(),
            resolution: self.resolution.clone(),
            color_palette: self.color_palette.clone(),
            batch_count,
        })
    }
}

/// Validated generation parameters, as stored on a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationParameters {
    pub style: String,
    pub resolution: String,
    pub color_palette: String,
    pub batch_count: u32,
}

/// JSON body of `POST /generate/text`.
#[derive(Debug, Deserialize)]
pub struct TextGenerationBody {
    pub text: Option<String>,
    #[serde(flatten)]
    pub parameters: GenerationRequest,
}

/// Response after a job has been accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Read-only projection of a job returned to polling clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_urls: Option<Vec<String>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A job as listed by `GET /history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub view: JobView,
    pub input_kind: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
    pub parameters: GenerationParameters,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub generations: Vec<HistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> GenerationLimits {
        GenerationLimits {
            styles: vec!["8bit".into(), "16bit".into()],
            resolutions: vec!["32x32".into()],
            color_palettes: vec!["classic".into()],
            max_batch_count: 4,
        }
    }

    fn request(batch_count: i64) -> GenerationRequest {
        GenerationRequest {
            style: "8bit".to_string(),
            resolution: "32x32".to_string(),
            color_palette: "classic".to_string(),
            batch_count,
        }
    }

    #[test]
    fn test_valid_request() {
        let params = request(4).validate_against(&limits()).unwrap();
        assert_eq!(params.batch_count, 4);
        assert_eq!(params.style, "8bit");
    }

    #[test]
    fn test_batch_count_bounds() {
        for bad in [0, -1, 5] {
            let err = request(bad).validate_against(&limits()).unwrap_err();
            assert_eq!(err.field, "batch_count", "batch_count {bad}");
        }
    }

    #[test]
    fn test_unknown_values_name_the_field() {
        let mut req = request(1);
        req.color_palette = "neon".to_string();
        let err = req.validate_against(&limits()).unwrap_err();
        assert_eq!(err.field, "color_palette");
        assert!(err.message.contains("neon"));

        let mut req = request(1);
        req.resolution = "33x33".to_string();
        assert_eq!(req.validate_against(&limits()).unwrap_err().field, "resolution");
    }

    #[test]
    fn test_batch_count_defaults_to_one() {
        let body: TextGenerationBody = serde_json::from_value(serde_json::json!({
            "text": "a red castle",
            "style": "8bit",
            "resolution": "32x32",
            "color_palette": "classic"
        }))
        .unwrap();
        assert_eq!(body.parameters.batch_count, 1);
    }

    #[test]
    fn test_view_omits_absent_results() {
        let view = JobView {
            job_id: Uuid::new_v4(),
            status: JobStatus::Pending,
            progress: 0.0,
            result_url: None,
            result_urls: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("result_url").is_none());
        assert!(json["error"].is_null());
    }
}
