//! Generation backend: the opaque capability that turns a validated input
//! into pixel-art images.

use async_trait::async_trait;
use base64::Engine;
use image::ImageFormat;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::generation::GenerationParameters;

/// Input handed to the backend once the worker has resolved it.
#[derive(Debug, Clone)]
pub enum InferenceInput {
    Text(String),
    Image(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub input: InferenceInput,
    pub parameters: GenerationParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

impl GeneratedImage {
    /// Wrap raw bytes, rejecting anything this build cannot decode.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, GenerationError> {
        let format = decodable_format(&bytes).ok_or_else(|| {
            GenerationError::MalformedOutput("unrecognised or unsupported image data".to_string())
        })?;
        Ok(Self { bytes, format })
    }

    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("bin")
    }

    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

/// Format of `bytes` if it is one the enabled `image` decoders can read.
pub fn decodable_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .filter(|format| format.reading_enabled())
}

/// Receives incremental progress in `[0, 1]` while a backend runs.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, fraction: f64);
}

/// Pixel-art generation capability.
///
/// Implementations are stateless per call and safe to share between jobs.
/// `infer` is invoked once per attempt and must not retry internally.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn infer(
        &self,
        request: &InferenceRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<GeneratedImage>, GenerationError>;
}

/// Client for an HTTP model-serving endpoint.
///
/// One request per image in the batch; the endpoint answers
/// `{"image": "<base64>"}`.
pub struct HttpInferenceClient {
    http: Client,
    endpoint: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct InferencePayload<'a> {
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    style: &'a str,
    resolution: &'a str,
    color_palette: &'a str,
    index: u32,
}

#[derive(Deserialize)]
struct InferenceResponse {
    image: String,
}

impl HttpInferenceClient {
    pub fn new(
        endpoint: String,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GenerationError::from)?;
        Ok(Self {
            http,
            endpoint,
            api_token: api_token.filter(|t| !t.is_empty()),
        })
    }

    async fn generate_one(
        &self,
        request: &InferenceRequest,
        encoded_image: Option<&str>,
        index: u32,
    ) -> Result<GeneratedImage, GenerationError> {
        let params = &request.parameters;
        let (mode, prompt) = match &request.input {
            InferenceInput::Text(text) => ("text", Some(text.as_str())),
            InferenceInput::Image(_) => ("image", None),
        };

        let payload = InferencePayload {
            mode,
            prompt,
            image: encoded_image.map(str::to_string),
            style: &params.style,
            resolution: &params.resolution,
            color_palette: &params.color_palette,
            index,
        };

        let mut call = self.http.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.api_token {
            call = call.bearer_auth(token);
        }

        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: InferenceResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedOutput(e.to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.image.trim())
            .map_err(|e| GenerationError::MalformedOutput(format!("invalid base64: {e}")))?;

        GeneratedImage::from_bytes(bytes)
    }
}

#[async_trait]
impl GenerationBackend for HttpInferenceClient {
    async fn infer(
        &self,
        request: &InferenceRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<GeneratedImage>, GenerationError> {
        let encoded_image = match &request.input {
            InferenceInput::Image(bytes) => {
                Some(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            InferenceInput::Text(_) => None,
        };

        let count = request.parameters.batch_count;
        let mut images = Vec::with_capacity(count as usize);
        for index in 0..count {
            let image = self
                .generate_one(request, encoded_image.as_deref(), index)
                .await?;
            images.push(image);
            progress.report(f64::from(index + 1) / f64::from(count)).await;
        }

        Ok(images)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Inference request failed: {0}")]
    Transport(reqwest::Error),

    #[error("Inference request timed out")]
    Timeout,

    #[error("Inference service answered HTTP {status}")]
    Rejected { status: u16 },

    #[error("Inference service returned malformed output: {0}")]
    MalformedOutput(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Transport(e)
        }
    }
}

impl GenerationError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Transport(_) | GenerationError::Timeout => true,
            GenerationError::Rejected { status } => {
                StatusCode::from_u16(*status).is_ok_and(|s| s.is_server_error())
            }
            GenerationError::MalformedOutput(_) => false,
        }
    }

    /// Message safe to store on the job and show to clients.
    pub fn user_message(&self) -> &'static str {
        match self {
            GenerationError::Transport(_) => "The image generator could not be reached",
            GenerationError::Timeout => "The image generator took too long to respond",
            GenerationError::Rejected { status } if *status < 500 => {
                "The image generator rejected the request"
            }
            GenerationError::Rejected { .. } => "The image generator failed to produce an image",
            GenerationError::MalformedOutput(_) => "The image generator returned an invalid image",
        }
    }
}
