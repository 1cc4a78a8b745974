use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{JobCounts, JobStore, Lease, StoreError};
use crate::models::job::{JobId, JobOptions, JobRecord, JobState, ReceiptJob};

struct Entry {
    record: JobRecord,
    lock: Option<String>,
    /// Lease deadline while active, ready time while delayed.
    due: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    jobs: HashMap<u64, Entry>,
    wait: BTreeSet<(u32, u64)>,
}

impl Inner {
    fn held(&mut self, lease: &Lease) -> Result<(u64, &mut Entry), StoreError> {
        let lost = || StoreError::LeaseLost(lease.record.id.clone());
        let seq = lease.record.id.parse::<u64>().map_err(|_| lost())?;
        match self.jobs.get_mut(&seq) {
            Some(entry)
                if entry.record.state == JobState::Active
                    && entry.lock.as_deref() == Some(lease.token.as_str()) =>
            {
                Ok((seq, entry))
            }
            _ => Err(lost()),
        }
    }

    fn requeue(&mut self, seq: u64) {
        if let Some(entry) = self.jobs.get_mut(&seq) {
            entry.record.state = JobState::Waiting;
            entry.lock = None;
            entry.due = None;
            self.wait.insert((entry.record.options.priority, seq));
        }
    }

    fn count(&self, state: JobState) -> u64 {
        self.jobs
            .values()
            .filter(|e| e.record.state == state)
            .count() as u64
    }
}

/// In-process job store with the same transitions as [`RedisJobStore`].
///
/// Deadlines use `tokio::time::Instant`, so tests can drive backoff and
/// stall timing with a paused clock.
///
/// [`RedisJobStore`]: super::RedisJobStore
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn add(&self, data: ReceiptJob, options: JobOptions) -> Result<JobId, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let seq = inner.next_id;
        let priority = options.priority;
        let record = JobRecord::new(seq.to_string(), data, options);
        inner.jobs.insert(
            seq,
            Entry {
                record,
                lock: None,
                due: None,
            },
        );
        inner.wait.insert((priority, seq));
        Ok(seq.to_string())
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let Ok(seq) = id.parse::<u64>() else {
            return Ok(None);
        };
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&seq).map(|e| e.record.clone()))
    }

    async fn lease(&self, lease_for: Duration) -> Result<Option<Lease>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some((_, seq)) = inner.wait.pop_first() else {
            return Ok(None);
        };
        let Some(entry) = inner.jobs.get_mut(&seq) else {
            return Ok(None);
        };

        let token = Uuid::new_v4().to_string();
        entry.record.state = JobState::Active;
        entry.record.progress = 0;
        entry.record.attempts_made += 1;
        entry.record.processed_at = Some(now_ms());
        entry.lock = Some(token.clone());
        entry.due = Some(Instant::now() + lease_for);

        Ok(Some(Lease {
            record: entry.record.clone(),
            token,
        }))
    }

    async fn progress(
        &self,
        lease: &Lease,
        progress: u8,
        lease_for: Duration,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let (_, entry) = inner.held(lease)?;
        entry.record.progress = progress.min(100);
        entry.due = Some(Instant::now() + lease_for);
        Ok(())
    }

    async fn complete(&self, lease: &Lease) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let (seq, entry) = inner.held(lease)?;
        if entry.record.options.remove_on_complete {
            inner.jobs.remove(&seq);
        } else {
            entry.record.state = JobState::Completed;
            entry.record.finished_at = Some(now_ms());
            entry.lock = None;
            entry.due = None;
        }
        Ok(())
    }

    async fn retry_later(
        &self,
        lease: &Lease,
        reason: &str,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let (_, entry) = inner.held(lease)?;
        entry.record.state = JobState::Delayed;
        entry.record.failed_reason = Some(reason.to_string());
        entry.lock = None;
        entry.due = Some(Instant::now() + delay);
        Ok(())
    }

    async fn fail(&self, lease: &Lease, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let (seq, entry) = inner.held(lease)?;
        if entry.record.options.remove_on_fail {
            inner.jobs.remove(&seq);
        } else {
            entry.record.state = JobState::Failed;
            entry.record.failed_reason = Some(reason.to_string());
            entry.record.finished_at = Some(now_ms());
            entry.lock = None;
            entry.due = None;
        }
        Ok(())
    }

    async fn promote_delayed(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let due: Vec<u64> = inner
            .jobs
            .iter()
            .filter(|(_, e)| e.record.state == JobState::Delayed && e.due.is_some_and(|d| d <= now))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &due {
            inner.requeue(*seq);
        }
        Ok(due.len())
    }

    async fn recover_stalled(&self) -> Result<Vec<JobId>, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let mut stalled: Vec<u64> = inner
            .jobs
            .iter()
            .filter(|(_, e)| e.record.state == JobState::Active && e.due.is_some_and(|d| d <= now))
            .map(|(seq, _)| *seq)
            .collect();
        stalled.sort_unstable();
        for seq in &stalled {
            if let Some(entry) = inner.jobs.get_mut(seq) {
                entry.record.attempts_made = entry.record.attempts_made.saturating_sub(1);
            }
            inner.requeue(*seq);
        }
        Ok(stalled.into_iter().map(|seq| seq.to_string()).collect())
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        let inner = self.inner.lock().await;
        Ok(JobCounts {
            waiting: inner.count(JobState::Waiting),
            delayed: inner.count(JobState::Delayed),
            active: inner.count(JobState::Active),
            completed: inner.count(JobState::Completed),
            failed: inner.count(JobState::Failed),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
