use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod health;
pub mod metrics;
pub mod receipts;

/// API routes backed by the receipt queue. `/metrics` is mounted separately.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/receipts/jobs", post(receipts::submit_receipt_job))
        .route(
            "/api/v1/receipts/jobs/{job_id}",
            get(receipts::get_job_status),
        )
        .with_state(state)
}
