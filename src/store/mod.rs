//! Durable job storage behind the receipt queue.
//!
//! A store moves each job between exactly one of the waiting, delayed,
//! active, completed and failed sets. Active jobs carry a lease: a random
//! token plus a deadline. Every transition out of `active` must present
//! the token, so only the worker currently holding the lease can finish
//! the job. A lease whose deadline passes is recovered back to waiting.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::models::job::{JobId, JobOptions, JobRecord, ReceiptJob};

pub mod memory;
pub mod redis;

pub use self::memory::MemoryJobStore;
pub use self::redis::RedisJobStore;

/// A job handed to a worker together with its lease token.
#[derive(Debug, Clone)]
pub struct Lease {
    pub record: JobRecord,
    pub token: String,
}

impl Lease {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Number of jobs in each set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// FIFO, priority-aware, lease-based job store.
///
/// Lower priority values are served first; equal priorities are FIFO.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job in the waiting set.
    async fn add(&self, data: ReceiptJob, options: JobOptions) -> Result<JobId, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Pop the next waiting job, mark it active and count the attempt.
    async fn lease(&self, lease_for: Duration) -> Result<Option<Lease>, StoreError>;

    /// Record progress and extend the lease deadline.
    async fn progress(
        &self,
        lease: &Lease,
        progress: u8,
        lease_for: Duration,
    ) -> Result<(), StoreError>;

    /// Finish a job; removes it when `remove_on_complete` is set.
    async fn complete(&self, lease: &Lease) -> Result<(), StoreError>;

    /// Park a failed attempt in the delayed set until `delay` has elapsed.
    async fn retry_later(
        &self,
        lease: &Lease,
        reason: &str,
        delay: Duration,
    ) -> Result<(), StoreError>;

    /// Terminal failure; the job stays inspectable unless `remove_on_fail`.
    async fn fail(&self, lease: &Lease, reason: &str) -> Result<(), StoreError>;

    /// Move delayed jobs whose backoff has elapsed to waiting.
    async fn promote_delayed(&self) -> Result<usize, StoreError>;

    /// Return active jobs whose lease expired to waiting.
    ///
    /// The stalled attempt is not counted against the job's attempt limit.
    async fn recover_stalled(&self) -> Result<Vec<JobId>, StoreError>;

    async fn counts(&self) -> Result<JobCounts, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: JobId, reason: String },

    #[error("Lease on job {0} is not held by this worker")]
    LeaseLost(JobId),
}
