use metrics_exporter_prometheus::PrometheusBuilder;
use receipt_queue::{
    config::AppConfig,
    db,
    routes::metrics::describe_metrics,
    services::{
        fraud::PgFraudDetector,
        ledger::PgReceiptLedger,
        ocr::MindeeClient,
        pipeline::ReceiptPipeline,
        queue::ReceiptQueue,
        worker::{QueueEvent, Worker, WorkerConfig},
    },
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
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

    tracing::info!("Starting receipt processing worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("WORKER_METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to start Prometheus exporter");
    describe_metrics();
    tracing::info!(%metrics_addr, "Serving worker metrics");

    let database_url = config
        .database_url
        .as_deref()
        .expect("DATABASE_URL is required by the worker");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!(redis_url = %config.redis_url(), "Connecting to Redis job store");
    let queue = ReceiptQueue::connect(&config)
        .await
        .expect("Failed to connect to job store");

    if config.mindee_api_key.is_empty() {
        tracing::warn!("MINDEE_API_KEY is not set, OCR requests will be rejected");
    }

    let pipeline = ReceiptPipeline::new(
        Arc::new(MindeeClient::new(config.mindee_api_key.clone())),
        Arc::new(PgFraudDetector::new(db_pool.clone())),
        Arc::new(PgReceiptLedger::new(db_pool)),
    );
    let worker = Worker::new(queue.store(), pipeline, WorkerConfig::from(&config));

    tokio::spawn(log_events(worker.subscribe()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, finishing current job");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    queue.close();
}

/// Trace the worker's event stream.
async fn log_events(mut events: broadcast::Receiver<QueueEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => tracing::debug!(?event, "Queue event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
