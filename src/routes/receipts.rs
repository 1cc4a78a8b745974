use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::{EnqueueResponse, ErrorResponse};
use crate::models::job::{JobState, JobStatus, ReceiptJob};
use crate::services::queue::QueueError;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Invalid(report) => {
                error(StatusCode::UNPROCESSABLE_ENTITY, report.to_string())
            }
            QueueError::Closed => error(StatusCode::SERVICE_UNAVAILABLE, "Queue is closed"),
            QueueError::Store(e) => {
                tracing::error!(error = %e, "Job store unavailable");
                error(StatusCode::SERVICE_UNAVAILABLE, "Job store unavailable")
            }
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    error(rejection.status(), rejection.body_text())
}

/// POST /api/v1/receipts/jobs: queue an uploaded receipt for processing.
pub async fn submit_receipt_job(
    State(state): State<AppState>,
    payload: Result<Json<ReceiptJob>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let Json(job) = payload.map_err(json_rejection)?;
    let job_id = state.queue.enqueue(job).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id,
            state: JobState::Waiting,
        }),
    ))
}

/// GET /api/v1/receipts/jobs/{job_id}: state, progress and payload of a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    state
        .queue
        .get_status(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("Job {job_id} not found")))
}
