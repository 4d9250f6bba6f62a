//! In-memory collaborators for exercising the job lifecycle without
//! PostgreSQL, Redis, R2 or a model server.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pixel_art_gen::app_state::AppState;
use pixel_art_gen::db::memory::MemoryJobStore;
use pixel_art_gen::models::generation::{GenerationLimits, GenerationRequest};
use pixel_art_gen::services::backend::{
    GeneratedImage, GenerationBackend, GenerationError, InferenceInput, InferenceRequest,
    ProgressReporter,
};
use pixel_art_gen::services::queue::{JobDispatcher, QueueError, QueuedJob};
use pixel_art_gen::services::storage::{BlobStore, StorageError};

pub const ASSET_BASE_URL: &str = "https://assets.test";

pub fn limits() -> GenerationLimits {
    GenerationLimits {
        styles: vec!["8bit".into(), "16bit".into(), "gameboy".into(), "modern".into()],
        resolutions: vec!["16x16".into(), "32x32".into(), "64x64".into(), "128x128".into()],
        color_palettes: vec!["classic".into(), "gameboy".into(), "nes".into(), "custom".into()],
        max_batch_count: 10,
    }
}

pub fn params(batch_count: i64) -> GenerationRequest {
    GenerationRequest {
        style: "8bit".to_string(),
        resolution: "32x32".to_string(),
        color_palette: "classic".to_string(),
        batch_count,
    }
}

/// A small opaque PNG.
pub fn tiny_png() -> Vec<u8> {
    let mut img = RgbaImage::from_pixel(4, 4, Rgba([200, 40, 40, 255]));
    img.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn connection_refused() -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"))
}

// ---------------------------------------------------------------------------
// Blob storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    pub fail_uploads: AtomicBool,
}

impl MemoryBlobStore {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status: 503,
            });
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get(key)
            .map(|(bytes, _)| bytes)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingDispatcher {
    jobs: Mutex<Vec<QueuedJob>>,
    completed: Mutex<Vec<QueuedJob>>,
    pub unavailable: AtomicBool,
}

impl RecordingDispatcher {
    pub fn queued(&self) -> Vec<QueuedJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<QueuedJob> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }

    /// Payloads released through `complete`.
    pub fn completed(&self) -> Vec<QueuedJob> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Redis(connection_refused()));
        }
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.completed.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Redis(connection_refused()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub enum Step {
    /// Return this many images regardless of the requested batch size.
    Images(usize),
    Fail(GenerationError),
}

/// Backend that plays back scripted steps, then succeeds with the requested
/// batch size once the script runs out.
#[derive(Default)]
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    last_input: Mutex<Option<InferenceInput>>,
}

impl ScriptedBackend {
    pub fn with_steps(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<InferenceInput> {
        self.last_input.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn infer(
        &self,
        request: &InferenceRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<GeneratedImage>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = Some(request.input.clone());

        let step = self.steps.lock().unwrap().pop_front();
        let count = match step {
            Some(Step::Fail(e)) => return Err(e),
            Some(Step::Images(n)) => n,
            None => request.parameters.batch_count as usize,
        };

        progress.report(0.5).await;
        (0..count)
            .map(|_| GeneratedImage::from_bytes(tiny_png()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct TestServices {
    pub store: Arc<MemoryJobStore>,
    pub storage: Arc<MemoryBlobStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub state: AppState,
}

pub fn services() -> TestServices {
    let store = Arc::new(MemoryJobStore::new());
    let storage = Arc::new(MemoryBlobStore::default());
    let dispatcher = Arc::new(RecordingDispatcher::default());

    let state = AppState::new(
        store.clone(),
        storage.clone(),
        dispatcher.clone(),
        limits(),
        ASSET_BASE_URL.to_string(),
    );

    TestServices {
        store,
        storage,
        dispatcher,
        state,
    }
}
