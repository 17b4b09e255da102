use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::services::queue::{JobQueue, QueueStats};

/// State for the scrape endpoint, kept apart from `AppState`.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<JobQueue>,
}

/// Register HELP text for every metric the server emits.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "generation_jobs_submitted_total",
        "Total generation jobs accepted into the queue"
    );
    metrics::describe_counter!(
        "generation_jobs_rejected_total",
        "Total submissions rejected because the queue was full"
    );
    metrics::describe_counter!(
        "generation_jobs_completed_total",
        "Total generation jobs completed"
    );
    metrics::describe_counter!(
        "generation_jobs_failed_total",
        "Total generation jobs that failed"
    );
    metrics::describe_counter!(
        "generation_jobs_evicted_total",
        "Total finished jobs removed by the cleanup sweeper"
    );
    metrics::describe_gauge!(
        "generation_queue_depth",
        "Current number of queued jobs waiting for the worker"
    );
    metrics::describe_gauge!(
        "generation_jobs_processing",
        "Jobs currently running on the GPU (0 or 1)"
    );
    metrics::describe_gauge!(
        "generation_jobs_retained",
        "Finished jobs kept until the cleanup sweeper evicts them"
    );
    metrics::describe_histogram!(
        "generation_processing_seconds",
        "Time spent running one generation job"
    );
}

fn record_queue_gauges(stats: &QueueStats) {
    metrics::gauge!("generation_queue_depth").set(stats.queued as f64);
    metrics::gauge!("generation_jobs_processing").set(stats.processing as f64);
    metrics::gauge!("generation_jobs_retained").set((stats.completed + stats.failed) as f64);
}

/// GET /metrics — Prometheus text exposition.
///
/// Queue gauges are refreshed from live counts on every scrape.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    record_queue_gauges(&state.queue.stats());
    state.handle.render()
}
