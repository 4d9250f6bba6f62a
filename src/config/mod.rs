use serde::Deserialize;
use std::time::Duration;

use crate::models::generation::GenerationLimits;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Redis connection string for the generation queue
    pub redis_url: String,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Public base URL under which stored objects are served to clients
    pub public_asset_base_url: String,

    /// Model-serving endpoint that produces pixel-art images
    pub inference_url: String,

    /// Bearer token for the model-serving endpoint, if it requires one
    #[serde(default)]
    pub inference_api_token: Option<String>,

    #[serde(default = "default_inference_timeout_secs")]
    pub inference_timeout_secs: u64,

    /// Backend invocations allowed per processing pass
    #[serde(default = "default_generation_max_attempts")]
    pub generation_max_attempts: u32,

    /// Delay before the first retry of a failed backend call; doubles per attempt
    #[serde(default = "default_generation_retry_backoff_ms")]
    pub generation_retry_backoff_ms: u64,

    /// Comma-separated list, e.g. "8bit,16bit,gameboy,modern"
    pub allowed_styles: Vec<String>,

    /// Comma-separated list, e.g. "16x16,32x32,64x64,128x128"
    pub allowed_resolutions: Vec<String>,

    /// Comma-separated list, e.g. "classic,gameboy,nes,custom"
    pub allowed_color_palettes: Vec<String>,

    pub max_batch_count: u32,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Jobs in `processing` longer than this are failed by the reaper
    #[serde(default = "default_reaper_timeout_secs")]
    pub reaper_timeout_secs: u64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Address for the worker's Prometheus scrape endpoint, e.g. "0.0.0.0:9100"
    #[serde(default)]
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_inference_timeout_secs() -> u64 {
    300
}

fn default_generation_max_attempts() -> u32 {
    3
}

fn default_generation_retry_backoff_ms() -> u64 {
    1000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_reaper_timeout_secs() -> u64 {
    15 * 60
}

fn default_reaper_interval_secs() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Allowed parameter values used to validate submissions.
    pub fn generation_limits(&self) -> GenerationLimits {
        GenerationLimits {
            styles: self.allowed_styles.clone(),
            resolutions: self.allowed_resolutions.clone(),
            color_palettes: self.allowed_color_palettes.clone(),
            max_batch_count: self.max_batch_count,
        }
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.generation_retry_backoff_ms)
    }

    pub fn reaper_timeout(&self) -> Duration {
        Duration::from_secs(self.reaper_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
