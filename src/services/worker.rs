use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

use crate::config::AppConfig;
use crate::models::job::{JobId, ProcessingResult};
use crate::services::pipeline::{ProgressReporter, ReceiptPipeline, StageError};
use crate::store::{JobStore, Lease, StoreError};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when no job is ready.
    pub poll_interval: Duration,
    /// Lease length; an active job silent for longer is treated as stalled.
    pub stall_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            stall_interval: Duration::from_millis(30_000),
        }
    }
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            stall_interval: config.stall_interval(),
        }
    }
}

/// Notifications published by a worker to its subscribers.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Progress {
        job_id: JobId,
        progress: u8,
    },
    Completed {
        job_id: JobId,
        result: ProcessingResult,
    },
    Failed {
        job_id: JobId,
        reason: String,
        attempts_made: u32,
        will_retry: bool,
    },
    Stalled {
        job_id: JobId,
    },
}

/// Pulls receipt jobs from the store and drives them through the pipeline.
pub struct Worker {
    store: Arc<dyn JobStore>,
    pipeline: ReceiptPipeline,
    config: WorkerConfig,
    events: broadcast::Sender<QueueEvent>,
}

/// Progress sink for one attempt: persists the checkpoint, extends the
/// lease, and publishes a progress event.
struct AttemptProgress<'a> {
    store: &'a dyn JobStore,
    lease: &'a Lease,
    lease_for: Duration,
    events: &'a broadcast::Sender<QueueEvent>,
}

#[async_trait]
impl ProgressReporter for AttemptProgress<'_> {
    async fn report(&self, progress: u8) -> Result<(), StageError> {
        self.store
            .progress(self.lease, progress, self.lease_for)
            .await?;
        let _ = self.events.send(QueueEvent::Progress {
            job_id: self.lease.record.id.clone(),
            progress,
        });
        Ok(())
    }
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, pipeline: ReceiptPipeline, config: WorkerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            pipeline,
            config,
            events,
        }
    }

    /// Register for completion, failure, stall and progress notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Process jobs until `shutdown` flips to true or its sender is dropped.
    /// An in-flight attempt always runs to the end.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            stall_interval_ms = self.config.stall_interval.as_millis() as u64,
            "Worker ready, starting job processing loop"
        );

        while !*shutdown.borrow() {
            let idle = match self.process_next_job().await {
                Ok(true) => {
                    tracing::debug!("Job processed, checking for next job");
                    false
                }
                Ok(false) => {
                    tracing::trace!("No jobs available, sleeping");
                    true
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error processing job, will retry");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Worker stopped");
    }

    /// Run housekeeping, then process the next ready job.
    /// Returns Ok(true) if a job was processed, Ok(false) if none was ready.
    pub async fn process_next_job(&self) -> Result<bool, StoreError> {
        let promoted = self.store.promote_delayed().await?;
        if promoted > 0 {
            tracing::debug!(promoted, "Delayed jobs ready for retry");
        }

        for job_id in self.store.recover_stalled().await? {
            metrics::counter!("receipt_jobs_stalled_total").increment(1);
            tracing::warn!(job_id = %job_id, "Receipt job stalled, returned to waiting");
            let _ = self.events.send(QueueEvent::Stalled { job_id });
        }

        let Some(lease) = self.store.lease(self.config.stall_interval).await? else {
            return Ok(false);
        };

        self.process(&lease).await?;
        Ok(true)
    }

    async fn process(&self, lease: &Lease) -> Result<(), StoreError> {
        let job = &lease.record.data;
        tracing::info!(
            job_id = %lease.id(),
            receipt_id = %job.receipt_id,
            attempt = lease.record.attempts_made,
            "Processing receipt job"
        );

        let reporter = AttemptProgress {
            store: self.store.as_ref(),
            lease,
            lease_for: self.config.stall_interval,
            events: &self.events,
        };

        let start = Instant::now();
        let outcome = self.pipeline.run(job, &reporter).await;
        metrics::histogram!("receipt_job_processing_seconds").record(start.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => {
                self.store.complete(lease).await?;
                metrics::counter!("receipt_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %lease.id(),
                    receipt_id = %result.receipt_id,
                    earnings = result.earnings,
                    "Receipt job completed"
                );
                let _ = self.events.send(QueueEvent::Completed {
                    job_id: lease.record.id.clone(),
                    result,
                });
            }
            Err(e) if e.is_lease_lost() => {
                tracing::warn!(
                    job_id = %lease.id(),
                    "Lease expired mid-attempt, abandoning result"
                );
            }
            Err(e) => self.handle_failure(lease, e.to_string()).await?,
        }

        Ok(())
    }

    async fn handle_failure(&self, lease: &Lease, reason: String) -> Result<(), StoreError> {
        let attempts_made = lease.record.attempts_made;
        let options = &lease.record.options;
        let will_retry = attempts_made < options.attempts;

        if will_retry {
            let delay = options.backoff.delay_for(attempts_made);
            self.store.retry_later(lease, &reason, delay).await?;
            metrics::counter!("receipt_jobs_retried_total").increment(1);
            tracing::info!(
                job_id = %lease.id(),
                attempt = attempts_made,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "Receipt job failed, retry scheduled"
            );
        } else {
            self.store.fail(lease, &reason).await?;
            metrics::counter!("receipt_jobs_failed_total").increment(1);
            tracing::error!(
                job_id = %lease.id(),
                receipt_id = %lease.record.data.receipt_id,
                attempts = attempts_made,
                error = %reason,
                "Receipt job failed after max attempts"
            );
        }

        let _ = self.events.send(QueueEvent::Failed {
            job_id: lease.record.id.clone(),
            reason,
            attempts_made,
            will_retry,
        });
        Ok(())
    }
}
