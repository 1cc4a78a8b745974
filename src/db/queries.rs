use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::models::receipt::{ReceiptData, ReceiptStatus};

/// Upload history of one user, for fraud scoring.
#[derive(Debug, Clone, Default)]
pub struct ReceiptHistory {
    pub total: i64,
    pub rejected: i64,
    pub first_upload: Option<DateTime<Utc>>,
}

/// Record the outcome of processing a receipt. Returns rows affected.
pub async fn update_receipt_status(
    pool: &PgPool,
    receipt_id: &str,
    status: ReceiptStatus,
    ocr_data: &ReceiptData,
    earnings: f64,
) -> Result<u64, sqlx::Error> {
    let rejection_reason = (status == ReceiptStatus::Rejected)
        .then_some("Flagged by fraud detection");

    let result = sqlx::query(
        r#"
        UPDATE receipts
        SET status = $2,
            merchant = $3,
            category = $4,
            amount = $5::numeric,
            earnings = $6::numeric,
            ocr_data = $7,
            rejection_reason = $8,
            processed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1::uuid
        "#,
    )
    .bind(receipt_id)
    .bind(status.as_ref())
    .bind(&ocr_data.merchant)
    .bind(ocr_data.category.as_ref())
    .bind(ocr_data.total)
    .bind(earnings)
    .bind(sqlx::types::Json(ocr_data))
    .bind(rejection_reason)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Credit earnings to a user's lifetime total and available balance.
pub async fn update_user_balance(
    pool: &PgPool,
    user_id: &str,
    earnings: f64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET total_earnings = total_earnings + $2::numeric,
            available_balance = available_balance + $2::numeric,
            updated_at = NOW()
        WHERE id = $1::uuid
        "#,
    )
    .bind(user_id)
    .bind(earnings)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Owner of another non-rejected receipt with the same image hash.
pub async fn find_duplicate_owner(
    pool: &PgPool,
    image_hash: &str,
    receipt_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT user_id::text AS user_id
        FROM receipts
        WHERE image_hash = $1
          AND status <> 'rejected'
          AND id <> $2::uuid
        LIMIT 1
        "#,
    )
    .bind(image_hash)
    .bind(receipt_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| r.try_get("user_id")).transpose()
}

/// Number of other receipts a user created at or after `since`.
pub async fn count_receipts_since(
    pool: &PgPool,
    user_id: &str,
    since: DateTime<Utc>,
    exclude_receipt_id: &str,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS count
        FROM receipts
        WHERE user_id = $1::uuid AND created_at >= $2 AND id <> $3::uuid
        "#,
    )
    .bind(user_id)
    .bind(since)
    .bind(exclude_receipt_id)
    .fetch_one(pool)
    .await?;

    row.try_get("count")
}

/// Upload history of a user, not counting `exclude_receipt_id`.
pub async fn receipt_history(
    pool: &PgPool,
    user_id: &str,
    exclude_receipt_id: &str,
) -> Result<ReceiptHistory, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE status = 'rejected') AS rejected,
               MIN(created_at) AS first_upload
        FROM receipts
        WHERE user_id = $1::uuid AND id <> $2::uuid
        "#,
    )
    .bind(user_id)
    .bind(exclude_receipt_id)
    .fetch_one(pool)
    .await?;

    Ok(ReceiptHistory {
        total: row.try_get("total")?,
        rejected: row.try_get("rejected")?,
        first_upload: row.try_get("first_upload")?,
    })
}

pub async fn set_image_hash(
    pool: &PgPool,
    receipt_id: &str,
    image_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE receipts
        SET image_hash = $2, updated_at = NOW()
        WHERE id = $1::uuid
        "#,
    )
    .bind(receipt_id)
    .bind(image_hash)
    .execute(pool)
    .await?;

    Ok(())
}
