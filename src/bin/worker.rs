use pixel_art_gen::{
    config::AppConfig,
    db::{self, queries::PgJobStore, store::JobStore},
    services::{
        backend::{GenerationBackend, HttpInferenceClient},
        queue::{JobDispatcher, JobQueue},
        reaper::Reaper,
        storage::{BlobStore, R2Client},
        worker::{GenerationWorker, JobOutcome},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting pixel-art generation worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(addr = %addr, "Serving worker metrics");
    }

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let pool_size = config.worker_concurrency.max(1) as u32 + 1;
    let db_pool = db::init_pool(&config.database_url, pool_size)
        .await
        .expect("Failed to connect to database");
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool));

    // Initialize services
    tracing::info!("Initializing services");
    let storage: Arc<dyn BlobStore> = Arc::new(
        R2Client::new(
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
        )
        .expect("Failed to initialize R2 client"),
    );

    let queue = Arc::new(JobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));

    // One backend for the life of the process, shared by every job.
    let backend: Arc<dyn GenerationBackend> = Arc::new(
        HttpInferenceClient::new(
            config.inference_url.clone(),
            config.inference_api_token.clone(),
            config.inference_timeout(),
        )
        .expect("Failed to initialize inference client"),
    );

    let worker = Arc::new(
        GenerationWorker::new(
            store.clone(),
            storage,
            backend,
            config.generation_max_attempts,
        )
        .with_retry_backoff(config.retry_backoff()),
    );

    let reaper = Reaper::new(store, config.reaper_timeout()).with_queue(queue.clone());
    let reaper_task = tokio::spawn(reaper.run(config.reaper_interval()));
    tracing::info!(
        timeout_secs = config.reaper_timeout_secs,
        interval_secs = config.reaper_interval_secs,
        "Reaper started"
    );

    let concurrency = config.worker_concurrency.max(1);
    tracing::info!(concurrency = concurrency, "Worker ready, starting job processing loop");

    let mut loops = JoinSet::new();
    for slot in 0..concurrency {
        loops.spawn(run_loop(
            slot,
            worker.clone(),
            queue.clone(),
            config.poll_interval(),
        ));
    }

    while let Some(result) = loops.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Worker loop terminated");
        }
    }

    reaper_task.abort();
}

/// Main processing loop for one concurrency slot.
async fn run_loop(
    slot: usize,
    worker: Arc<GenerationWorker>,
    queue: Arc<JobQueue>,
    poll_interval: Duration,
) {
    loop {
        match process_next_job(&worker, &queue).await {
            Ok(true) => {
                tracing::debug!(slot = slot, "Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!(slot = slot, "No jobs available, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(slot = slot, error = %e, "Error processing job, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was handled, Ok(false) if no job available.
async fn process_next_job(
    worker: &GenerationWorker,
    queue: &JobQueue,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    if let Ok(depth) = queue.queue_depth().await {
        metrics::gauge!("generation_queue_depth").set(depth as f64);
    }

    let job = match queue.dequeue().await? {
        Some(j) => j,
        None => return Ok(false),
    };

    // Store unreachable: put the payload back. A redelivered job that already
    // started is skipped and left to the reaper.
    let outcome = match worker.process(&job).await {
        Ok(outcome) => outcome,
        Err(e) => {
            queue.enqueue(&job).await?;
            queue.complete(&job).await?;
            return Err(e.into());
        }
    };

    match outcome {
        JobOutcome::Completed | JobOutcome::Failed => {}
        JobOutcome::Skipped(status) => {
            tracing::info!(job_id = %job.job_id, status = %status, "Dropping redelivered job");
        }
    }

    queue.complete(&job).await?;
    Ok(true)
}
