//! Stub pipeline collaborators for queue and worker tests

#![allow(dead_code)]

use async_trait::async_trait;
use receipt_queue::models::job::ReceiptJob;
use receipt_queue::models::receipt::{
    FraudAssessment, ReceiptCategory, ReceiptData, ReceiptStatus,
};
use receipt_queue::services::pipeline::{
    FraudDetector, OcrEngine, ReceiptLedger, ReceiptPipeline, StageError,
};
use receipt_queue::services::worker::WorkerConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub fn sample_job() -> ReceiptJob {
    job_for("r1")
}

pub fn job_for(receipt_id: &str) -> ReceiptJob {
    ReceiptJob {
        receipt_id: receipt_id.to_string(),
        user_id: "u1".to_string(),
        image_url: format!("https://x/{receipt_id}.jpg"),
        image_path: format!("/tmp/{receipt_id}.jpg"),
    }
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(1000),
        stall_interval: Duration::from_secs(30),
    }
}

/// OCR stub that records when each attempt reached it.
pub struct StubOcr {
    fail: bool,
    calls: Mutex<Vec<Instant>>,
}

impl StubOcr {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrEngine for StubOcr {
    async fn extract_receipt_data(&self, _image_url: &str) -> Result<ReceiptData, StageError> {
        self.calls.lock().unwrap().push(Instant::now());
        if self.fail {
            return Err(StageError::Ocr("OCR service unavailable".into()));
        }
        Ok(ReceiptData {
            merchant: "Best Buy".to_string(),
            category: ReceiptCategory::Electronics,
            date: Some("2024-05-01".to_string()),
            total: 100.0,
            currency: "USD".to_string(),
            confidence: 0.95,
            items: Vec::new(),
        })
    }
}

pub struct ApproveAll;

#[async_trait]
impl FraudDetector for ApproveAll {
    async fn detect_fraud(&self, _job: &ReceiptJob) -> Result<FraudAssessment, StageError> {
        Ok(FraudAssessment {
            is_fraudulent: false,
            risk_score: 0,
            reasons: Vec::new(),
        })
    }
}

#[derive(Default)]
pub struct RecordingLedger {
    pub statuses: Mutex<Vec<(String, ReceiptStatus, f64)>>,
    pub credits: Mutex<Vec<(String, f64)>>,
}

#[async_trait]
impl ReceiptLedger for RecordingLedger {
    async fn update_receipt_status(
        &self,
        receipt_id: &str,
        status: ReceiptStatus,
        _ocr_data: &ReceiptData,
        earnings: f64,
    ) -> Result<(), StageError> {
        self.statuses
            .lock()
            .unwrap()
            .push((receipt_id.to_string(), status, earnings));
        Ok(())
    }

    async fn update_user_balance(&self, user_id: &str, earnings: f64) -> Result<(), StageError> {
        self.credits
            .lock()
            .unwrap()
            .push((user_id.to_string(), earnings));
        Ok(())
    }
}

pub fn pipeline(ocr: Arc<StubOcr>, ledger: Arc<RecordingLedger>) -> ReceiptPipeline {
    ReceiptPipeline::new(ocr, Arc::new(ApproveAll), ledger)
}
