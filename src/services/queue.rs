use garde::Validate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::job::{JobId, JobOptions, JobStatus, ReceiptJob};
use crate::store::{JobCounts, JobStore, RedisJobStore, StoreError};

/// Client side of the receipt-processing queue.
///
/// Constructed explicitly and handed to whoever needs to submit or look
/// up jobs; the pipeline itself runs in [`Worker`](super::worker::Worker).
pub struct ReceiptQueue {
    store: Arc<dyn JobStore>,
    defaults: JobOptions,
    closed: AtomicBool,
}

impl ReceiptQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            defaults: JobOptions::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Override the options applied to every enqueued job.
    pub fn with_options(mut self, defaults: JobOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Connect to the Redis job store named by `config`.
    pub async fn connect(config: &AppConfig) -> Result<Self, QueueError> {
        let store = RedisJobStore::connect(&config.redis_url(), &config.queue_name).await?;
        tracing::info!(
            host = %config.redis_host,
            port = config.redis_port,
            queue = %config.queue_name,
            "Connected to receipt job store"
        );
        Ok(Self::new(Arc::new(store)))
    }

    /// Stop accepting new jobs. Lookups keep working.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Receipt queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    /// Validate and persist a receipt job in the waiting state.
    pub async fn enqueue(&self, job: ReceiptJob) -> Result<JobId, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        job.validate()?;

        let receipt_id = job.receipt_id.clone();
        let job_id = self.store.add(job, self.defaults.clone()).await?;

        metrics::counter!("receipt_jobs_enqueued_total").increment(1);
        tracing::info!(job_id = %job_id, receipt_id = %receipt_id, "Receipt job enqueued");

        Ok(job_id)
    }

    /// Current state, progress and payload of a job, or `None` if unknown.
    pub async fn get_status(&self, job_id: &str) -> Result<Option<JobStatus>, QueueError> {
        Ok(self.store.get(job_id).await?.map(JobStatus::from))
    }

    pub async fn counts(&self) -> Result<JobCounts, QueueError> {
        let counts = self.store.counts().await?;
        metrics::gauge!("receipt_queue_depth").set((counts.waiting + counts.delayed) as f64);
        Ok(counts)
    }

    /// Check store connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.store.ping().await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Invalid receipt job: {0}")]
    Invalid(#[from] garde::Report),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue is closed")]
    Closed,
}
