use garde::Validate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::receipt::{FraudAssessment, ReceiptData};

/// Opaque job identifier allocated by the job store.
pub type JobId = String;

/// Lifecycle state of a receipt job in the queue store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Waiting,
    /// Waiting for a retry backoff to elapse.
    Delayed,
    Active,
    Completed,
    Failed,
}

/// Receipt-processing request, validated before it enters the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptJob {
    #[garde(length(min = 1, max = 128))]
    pub receipt_id: String,

    #[garde(length(min = 1, max = 128))]
    pub user_id: String,

    #[garde(length(min = 1, max = 2048), url, custom(http_scheme))]
    pub image_url: String,

    #[garde(length(min = 1, max = 1024))]
    pub image_path: String,
}

fn http_scheme(value: &str, _ctx: &()) -> garde::Result {
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        Err(garde::Error::new("image URL must use http or https"))
    }
}

/// Delay policy applied between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    /// `delay_ms * 2^(retry - 1)`
    Exponential { delay_ms: u64 },
}

impl Backoff {
    /// Delay before retry number `retry` (1-based: the first retry is 1).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { delay_ms } => {
                let exp = retry.saturating_sub(1).min(32);
                Duration::from_millis(delay_ms.saturating_mul(1u64 << exp))
            }
        }
    }
}

/// Per-job options stored alongside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub attempts: u32,
    pub backoff: Backoff,
    pub priority: u32,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::Exponential { delay_ms: 2000 },
            priority: 1,
            remove_on_complete: true,
            remove_on_fail: false,
        }
    }
}

/// Everything the store keeps for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub data: ReceiptJob,
    pub options: JobOptions,
    pub state: JobState,
    pub progress: u8,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub processed_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl JobRecord {
    pub fn new(id: JobId, data: ReceiptJob, options: JobOptions) -> Self {
        Self {
            id,
            data,
            options,
            state: JobState::Waiting,
            progress: 0,
            attempts_made: 0,
            failed_reason: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            processed_at: None,
            finished_at: None,
        }
    }
}

/// Snapshot returned by a status lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    pub progress: u8,
    pub data: ReceiptJob,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
}

impl From<JobRecord> for JobStatus {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            state: record.state,
            progress: record.progress,
            data: record.data,
            attempts_made: record.attempts_made,
            failed_reason: record.failed_reason,
        }
    }
}

/// Value produced by a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    pub receipt_id: String,
    pub ocr_data: ReceiptData,
    pub fraud: FraudAssessment,
    pub earnings: f64,
}
