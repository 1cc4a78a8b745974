use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::queries;
use crate::models::receipt::{ReceiptData, ReceiptStatus};
use crate::services::pipeline::{ReceiptLedger, StageError};

/// Writes processing outcomes to the receipts and users tables.
pub struct PgReceiptLedger {
    db: PgPool,
}

impl PgReceiptLedger {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn persistence(e: sqlx::Error) -> StageError {
    StageError::Persistence(Box::new(e))
}

#[async_trait]
impl ReceiptLedger for PgReceiptLedger {
    async fn update_receipt_status(
        &self,
        receipt_id: &str,
        status: ReceiptStatus,
        ocr_data: &ReceiptData,
        earnings: f64,
    ) -> Result<(), StageError> {
        let updated =
            queries::update_receipt_status(&self.db, receipt_id, status, ocr_data, earnings)
                .await
                .map_err(persistence)?;
        if updated == 0 {
            return Err(StageError::Persistence(
                format!("receipt {receipt_id} not found").into(),
            ));
        }
        Ok(())
    }

    async fn update_user_balance(&self, user_id: &str, earnings: f64) -> Result<(), StageError> {
        let updated = queries::update_user_balance(&self.db, user_id, earnings)
            .await
            .map_err(persistence)?;
        if updated == 0 {
            return Err(StageError::Persistence(
                format!("user {user_id} not found").into(),
            ));
        }
        Ok(())
    }
}
