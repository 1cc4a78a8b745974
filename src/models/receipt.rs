use serde::{Deserialize, Serialize};

/// Spending category assigned from the merchant name.
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
pub enum ReceiptCategory {
    Grocery,
    Electronics,
    Restaurant,
    Retail,
    Pharmacy,
    Other,
}

/// One line item read off a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_amount: f64,
}

/// Structured fields extracted by the OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptData {
    pub merchant: String,
    pub category: ReceiptCategory,
    pub date: Option<String>,
    pub total: f64,
    pub currency: String,
    /// Average field confidence, 0.0 to 1.0.
    pub confidence: f64,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

/// Outcome of a fraud-risk evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudAssessment {
    pub is_fraudulent: bool,
    /// Higher is more suspicious.
    pub risk_score: u32,
    pub reasons: Vec<String>,
}

/// Persisted review status of a receipt.
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
pub enum ReceiptStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
    Duplicate,
}

/// Quality report for OCR output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub valid: bool,
    pub errors: Vec<String>,
}
