use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the receipt queue metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "receipt_jobs_enqueued_total",
        "Receipt jobs accepted into the queue"
    );
    metrics::describe_counter!(
        "receipt_jobs_completed_total",
        "Receipt jobs that finished all pipeline stages"
    );
    metrics::describe_counter!(
        "receipt_jobs_retried_total",
        "Failed attempts scheduled for retry"
    );
    metrics::describe_counter!(
        "receipt_jobs_failed_total",
        "Receipt jobs that exhausted their attempts"
    );
    metrics::describe_counter!(
        "receipt_jobs_stalled_total",
        "Active jobs whose lease expired without progress"
    );
    metrics::describe_histogram!(
        "receipt_job_processing_seconds",
        "Time spent in one pipeline attempt"
    );
    metrics::describe_gauge!(
        "receipt_queue_depth",
        "Jobs waiting or delayed in the queue"
    );
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
