use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::io::Cursor;

use crate::db::queries;
use crate::models::job::ReceiptJob;
use crate::models::receipt::FraudAssessment;
use crate::services::pipeline::{FraudDetector, StageError};

/// Scores at or above this block the receipt.
pub const FRAUD_THRESHOLD: u32 = 70;

/// Who already uploaded an identical image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplicate {
    SameUser,
    OtherUser,
}

/// Facts gathered about an upload before scoring it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FraudSignals {
    pub duplicate: Option<Duplicate>,
    pub receipts_today: i64,
    pub receipts_last_five_minutes: i64,
    pub total_receipts: i64,
    pub rejected_receipts: i64,
    pub hours_since_first_upload: Option<f64>,
    pub dimensions: Option<(u32, u32)>,
}

/// Turn signals into a risk score. No single soft signal reaches the threshold.
pub fn score(signals: &FraudSignals) -> FraudAssessment {
    let mut flags: Vec<&str> = Vec::new();
    let mut score = 0;

    match signals.duplicate {
        Some(Duplicate::SameUser) => {
            flags.push("duplicate_self");
            score += 80;
        }
        Some(Duplicate::OtherUser) => {
            flags.push("duplicate_other_user");
            score += 100;
        }
        None => {}
    }

    if signals.receipts_today >= 20 {
        flags.push("velocity_limit_exceeded");
        score += 60;
    } else if signals.receipts_today >= 15 {
        flags.push("high_velocity");
        score += 30;
    }

    if signals.receipts_last_five_minutes >= 5 {
        flags.push("rapid_submission");
        score += 40;
    }

    if let Some((width, height)) = signals.dimensions {
        if width == height {
            flags.push("square_image");
            score += 15;
        }
        if u64::from(width) * u64::from(height) < 200_000 {
            flags.push("low_resolution");
            score += 25;
        }
    }

    if signals.total_receipts > 10
        && signals.rejected_receipts as f64 / signals.total_receipts as f64 > 0.3
    {
        flags.push("high_rejection_rate");
        score += 50;
    }

    if signals
        .hours_since_first_upload
        .is_some_and(|hours| hours < 24.0)
        && signals.receipts_today >= 10
    {
        flags.push("new_account_high_activity");
        score += 45;
    }

    FraudAssessment {
        is_fraudulent: score >= FRAUD_THRESHOLD,
        risk_score: score,
        reasons: flags.into_iter().map(String::from).collect(),
    }
}

/// Hex SHA-256 of the image bytes, used to spot re-uploads.
pub fn image_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Fraud detector backed by the receipts table.
pub struct PgFraudDetector {
    db: PgPool,
}

impl PgFraudDetector {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn signals(
        &self,
        job: &ReceiptJob,
        hash: &str,
        bytes: &[u8],
    ) -> Result<FraudSignals, sqlx::Error> {
        let now = Utc::now();
        let start_of_day = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now);

        let duplicate = queries::find_duplicate_owner(&self.db, hash, &job.receipt_id)
            .await?
            .map(|owner| {
                if owner == job.user_id {
                    Duplicate::SameUser
                } else {
                    Duplicate::OtherUser
                }
            });
        // Signals describe prior uploads; the receipt being scored already has a row.
        let receipts_today =
            queries::count_receipts_since(&self.db, &job.user_id, start_of_day, &job.receipt_id)
                .await?;
        let receipts_last_five_minutes = queries::count_receipts_since(
            &self.db,
            &job.user_id,
            now - ChronoDuration::minutes(5),
            &job.receipt_id,
        )
        .await?;
        let history = queries::receipt_history(&self.db, &job.user_id, &job.receipt_id).await?;

        Ok(FraudSignals {
            duplicate,
            receipts_today,
            receipts_last_five_minutes,
            total_receipts: history.total,
            rejected_receipts: history.rejected,
            hours_since_first_upload: history
                .first_upload
                .map(|first| (now - first).num_minutes() as f64 / 60.0),
            dimensions: image_dimensions(bytes),
        })
    }
}

#[async_trait]
impl FraudDetector for PgFraudDetector {
    async fn detect_fraud(&self, job: &ReceiptJob) -> Result<FraudAssessment, StageError> {
        let bytes = tokio::fs::read(&job.image_path)
            .await
            .map_err(|e| StageError::Fraud(Box::new(e)))?;
        let hash = image_hash(&bytes);

        let signals = self
            .signals(job, &hash, &bytes)
            .await
            .map_err(|e| StageError::Fraud(Box::new(e)))?;
        queries::set_image_hash(&self.db, &job.receipt_id, &hash)
            .await
            .map_err(|e| StageError::Fraud(Box::new(e)))?;

        let assessment = score(&signals);
        if assessment.is_fraudulent {
            tracing::warn!(
                receipt_id = %job.receipt_id,
                user_id = %job.user_id,
                risk_score = assessment.risk_score,
                flags = ?assessment.reasons,
                "Suspicious receipt upload"
            );
        }
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_history_passes() {
        let assessment = score(&FraudSignals {
            receipts_today: 3,
            total_receipts: 40,
            rejected_receipts: 2,
            hours_since_first_upload: Some(500.0),
            dimensions: Some((1200, 1600)),
            ..FraudSignals::default()
        });
        assert!(!assessment.is_fraudulent);
        assert_eq!(assessment.risk_score, 0);
        assert!(assessment.reasons.is_empty());
    }

    #[test]
    fn test_duplicate_of_other_user_blocks() {
        let assessment = score(&FraudSignals {
            duplicate: Some(Duplicate::OtherUser),
            ..FraudSignals::default()
        });
        assert!(assessment.is_fraudulent);
        assert_eq!(assessment.reasons, vec!["duplicate_other_user".to_string()]);
    }

    #[test]
    fn test_own_duplicate_blocks() {
        let assessment = score(&FraudSignals {
            duplicate: Some(Duplicate::SameUser),
            ..FraudSignals::default()
        });
        assert!(assessment.is_fraudulent);
        assert_eq!(assessment.risk_score, 80);
    }

    #[test]
    fn test_high_velocity_alone_is_tolerated() {
        let assessment = score(&FraudSignals {
            receipts_today: 16,
            ..FraudSignals::default()
        });
        assert!(!assessment.is_fraudulent);
        assert_eq!(assessment.risk_score, 30);
    }

    #[test]
    fn test_signals_accumulate_past_threshold() {
        // 60 velocity + 40 rapid submission
        let assessment = score(&FraudSignals {
            receipts_today: 20,
            receipts_last_five_minutes: 5,
            ..FraudSignals::default()
        });
        assert!(assessment.is_fraudulent);
        assert_eq!(assessment.risk_score, 100);
    }

    #[test]
    fn test_small_square_screenshot() {
        let assessment = score(&FraudSignals {
            dimensions: Some((300, 300)),
            ..FraudSignals::default()
        });
        assert_eq!(assessment.risk_score, 40);
        assert!(!assessment.is_fraudulent);
    }

    #[test]
    fn test_new_account_with_burst() {
        let assessment = score(&FraudSignals {
            receipts_today: 10,
            hours_since_first_upload: Some(2.0),
            ..FraudSignals::default()
        });
        assert_eq!(assessment.reasons, vec!["new_account_high_activity".to_string()]);
    }

    #[test]
    fn test_rejection_rate_needs_history() {
        let few = score(&FraudSignals {
            total_receipts: 5,
            rejected_receipts: 4,
            ..FraudSignals::default()
        });
        assert_eq!(few.risk_score, 0);

        let many = score(&FraudSignals {
            total_receipts: 20,
            rejected_receipts: 8,
            ..FraudSignals::default()
        });
        assert_eq!(many.risk_score, 50);
    }

    #[test]
    fn test_image_hash_is_stable_hex() {
        let hash = image_hash(b"receipt");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, image_hash(b"receipt"));
        assert_ne!(hash, image_hash(b"receipt2"));
    }

    #[test]
    fn test_unreadable_image_has_no_dimensions() {
        assert_eq!(image_dimensions(b"not an image"), None);
    }
}
