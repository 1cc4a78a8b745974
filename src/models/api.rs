use serde::Serialize;

use crate::models::job::{JobId, JobState};

/// Response after submitting a receipt for processing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: JobId,
    pub state: JobState,
}

/// Error body returned by the API.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
