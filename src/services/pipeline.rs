//! The five-stage receipt pipeline and the collaborators it drives.
//!
//! Stages run strictly in order and report progress after each one:
//!
//! | Stage                     | Progress |
//! |---------------------------|----------|
//! | OCR extraction            | 20       |
//! | Fraud-risk evaluation     | 40       |
//! | Earnings computation      | 60       |
//! | Receipt status update     | 80       |
//! | User balance update       | 100      |
//!
//! The first stage error aborts the attempt.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::job::{ProcessingResult, ReceiptJob};
use crate::models::receipt::{FraudAssessment, ReceiptData, ReceiptStatus};
use crate::services::{earnings, ocr};
use crate::store::StoreError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Reads structured fields off a receipt image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_receipt_data(&self, image_url: &str) -> Result<ReceiptData, StageError>;
}

/// Scores how likely a receipt upload is to be fraudulent.
#[async_trait]
pub trait FraudDetector: Send + Sync {
    async fn detect_fraud(&self, job: &ReceiptJob) -> Result<FraudAssessment, StageError>;
}

/// Persistence of processing outcomes.
#[async_trait]
pub trait ReceiptLedger: Send + Sync {
    async fn update_receipt_status(
        &self,
        receipt_id: &str,
        status: ReceiptStatus,
        ocr_data: &ReceiptData,
        earnings: f64,
    ) -> Result<(), StageError>;

    async fn update_user_balance(&self, user_id: &str, earnings: f64) -> Result<(), StageError>;
}

/// Receives the progress checkpoints of one attempt.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: u8) -> Result<(), StageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("OCR extraction failed: {0}")]
    Ocr(BoxError),

    #[error("Fraud check failed: {0}")]
    Fraud(BoxError),

    #[error("Persistence failed: {0}")]
    Persistence(BoxError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StageError {
    /// The job was taken away from this worker mid-attempt.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, StageError::Store(StoreError::LeaseLost(_)))
    }
}

#[derive(Clone)]
pub struct ReceiptPipeline {
    ocr: Arc<dyn OcrEngine>,
    fraud: Arc<dyn FraudDetector>,
    ledger: Arc<dyn ReceiptLedger>,
}

impl ReceiptPipeline {
    pub fn new(
        ocr: Arc<dyn OcrEngine>,
        fraud: Arc<dyn FraudDetector>,
        ledger: Arc<dyn ReceiptLedger>,
    ) -> Self {
        Self { ocr, fraud, ledger }
    }

    pub async fn run(
        &self,
        job: &ReceiptJob,
        progress: &dyn ProgressReporter,
    ) -> Result<ProcessingResult, StageError> {
        tracing::info!(
            receipt_id = %job.receipt_id,
            user_id = %job.user_id,
            "Processing receipt"
        );

        let ocr_data = self.ocr.extract_receipt_data(&job.image_url).await?;
        let quality = ocr::validate_receipt_data(&ocr_data);
        if !quality.valid {
            tracing::warn!(
                receipt_id = %job.receipt_id,
                problems = ?quality.errors,
                "Low quality OCR result"
            );
        }
        progress.report(20).await?;

        let fraud = self.fraud.detect_fraud(job).await?;
        tracing::debug!(
            receipt_id = %job.receipt_id,
            risk_score = fraud.risk_score,
            fraudulent = fraud.is_fraudulent,
            "Fraud check complete"
        );
        progress.report(40).await?;

        let earnings = if fraud.is_fraudulent {
            0.0
        } else {
            earnings::calculate_earnings(ocr_data.total, ocr_data.category)
        };
        progress.report(60).await?;

        let status = if fraud.is_fraudulent {
            ReceiptStatus::Rejected
        } else {
            ReceiptStatus::Approved
        };
        self.ledger
            .update_receipt_status(&job.receipt_id, status, &ocr_data, earnings)
            .await?;
        progress.report(80).await?;

        if earnings > 0.0 {
            self.ledger
                .update_user_balance(&job.user_id, earnings)
                .await?;
        }
        progress.report(100).await?;

        tracing::info!(
            receipt_id = %job.receipt_id,
            status = %status,
            earnings,
            "Receipt processed"
        );

        Ok(ProcessingResult {
            success: true,
            receipt_id: job.receipt_id.clone(),
            ocr_data,
            fraud,
            earnings,
        })
    }
}
