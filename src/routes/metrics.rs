use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the global Prometheus recorder and describe the job metrics.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!(
        "generation_jobs_submitted_total",
        "Generation jobs accepted, by input kind"
    );
    metrics::describe_counter!(
        "generation_jobs_completed_total",
        "Generation jobs that produced output"
    );
    metrics::describe_counter!(
        "generation_jobs_failed_total",
        "Generation jobs that failed during processing"
    );
    metrics::describe_counter!(
        "generation_jobs_reaped_total",
        "Jobs failed by the reaper after exceeding the processing timeout"
    );
    metrics::describe_histogram!(
        "generation_processing_seconds",
        "Time from job start to completion or failure"
    );
    metrics::describe_gauge!(
        "generation_queue_depth",
        "Jobs waiting in the queue"
    );

    Ok(Arc::new(handle))
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
