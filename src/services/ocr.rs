use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::models::receipt::{LineItem, QualityReport, ReceiptData};
use crate::services::earnings;
use crate::services::pipeline::{OcrEngine, StageError};

const MINDEE_RECEIPTS_URL: &str =
    "https://api.mindee.net/v1/products/mindee/expense_receipts/v5/predict";

/// Client for the Mindee expense receipt API.
pub struct MindeeClient {
    http: Client,
    api_key: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct MindeeResponse {
    document: MindeeDocument,
}

#[derive(Deserialize)]
struct MindeeDocument {
    inference: MindeeInference,
}

#[derive(Deserialize)]
struct MindeeInference {
    prediction: Prediction,
}

#[derive(Deserialize)]
struct Field<T> {
    value: Option<T>,
    confidence: Option<f64>,
}

#[derive(Deserialize)]
struct Locale {
    currency: Option<String>,
}

#[derive(Deserialize)]
struct PredictedItem {
    description: Option<String>,
    quantity: Option<f64>,
    unit_price: Option<f64>,
    total_amount: Option<f64>,
}

#[derive(Deserialize, Default)]
struct Prediction {
    supplier_name: Option<Field<String>>,
    date: Option<Field<String>>,
    total_amount: Option<Field<f64>>,
    locale: Option<Locale>,
    #[serde(default)]
    line_items: Vec<PredictedItem>,
}

impl MindeeClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            endpoint: MINDEE_RECEIPTS_URL.to_string(),
        }
    }

    /// Point the client at a different prediction endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Send a receipt image URL to Mindee and map the prediction.
    pub async fn extract(&self, image_url: &str) -> Result<ReceiptData, OcrError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&serde_json::json!({ "document": image_url }))
            .send()
            .await?
            .error_for_status()?;

        let body: MindeeResponse = response.json().await?;
        Ok(into_receipt_data(body.document.inference.prediction))
    }
}

#[async_trait]
impl OcrEngine for MindeeClient {
    async fn extract_receipt_data(&self, image_url: &str) -> Result<ReceiptData, StageError> {
        self.extract(image_url)
            .await
            .map_err(|e| StageError::Ocr(Box::new(e)))
    }
}

fn into_receipt_data(prediction: Prediction) -> ReceiptData {
    let confidence = average_confidence(&prediction);

    let merchant = prediction
        .supplier_name
        .and_then(|f| f.value)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    let items = prediction
        .line_items
        .into_iter()
        .map(|item| LineItem {
            description: item.description.unwrap_or_default(),
            quantity: item.quantity.unwrap_or(1.0),
            unit_price: item.unit_price.unwrap_or(0.0),
            total_amount: item.total_amount.unwrap_or(0.0),
        })
        .collect();

    ReceiptData {
        category: earnings::categorize(&merchant),
        merchant,
        date: prediction.date.and_then(|f| f.value),
        total: prediction.total_amount.and_then(|f| f.value).unwrap_or(0.0),
        currency: prediction
            .locale
            .and_then(|l| l.currency)
            .unwrap_or_else(|| "USD".to_string()),
        confidence,
        items,
    }
}

/// Mean confidence of total, merchant and date, rounded to two decimals.
fn average_confidence(prediction: &Prediction) -> f64 {
    let confidences: Vec<f64> = [
        prediction.total_amount.as_ref().and_then(|f| f.confidence),
        prediction.supplier_name.as_ref().and_then(|f| f.confidence),
        prediction.date.as_ref().and_then(|f| f.confidence),
    ]
    .into_iter()
    .flatten()
    .filter(|c| *c > 0.0)
    .collect();

    if confidences.is_empty() {
        return 0.0;
    }
    let avg = confidences.iter().sum::<f64>() / confidences.len() as f64;
    (avg * 100.0).round() / 100.0
}

/// Flag OCR output that is unlikely to be usable.
pub fn validate_receipt_data(data: &ReceiptData) -> QualityReport {
    let mut errors = Vec::new();

    if data.total <= 0.0 {
        errors.push("Receipt total amount is missing or invalid".to_string());
    }
    if data.confidence > 0.0 && data.confidence < 0.5 {
        errors.push("OCR confidence is too low (< 50%)".to_string());
    }
    if data.merchant.is_empty() || data.merchant == "Unknown" {
        errors.push("Merchant name could not be identified".to_string());
    }

    QualityReport {
        valid: errors.is_empty(),
        errors,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::receipt::ReceiptCategory;

    fn parse(body: serde_json::Value) -> ReceiptData {
        let response: MindeeResponse = serde_json::from_value(body).unwrap();
        into_receipt_data(response.document.inference.prediction)
    }

    #[test]
    fn test_maps_prediction_fields() {
        let data = parse(serde_json::json!({
            "document": { "inference": { "prediction": {
                "supplier_name": { "value": "Whole Foods Market", "confidence": 0.98 },
                "date": { "value": "2024-03-02", "confidence": 0.91 },
                "total_amount": { "value": 54.2, "confidence": 0.99 },
                "locale": { "currency": "CAD" },
                "line_items": [
                    {
                        "description": "Apples",
                        "quantity": 2.0,
                        "unit_price": 1.5,
                        "total_amount": 3.0
                    },
                    { "description": "Bread" }
                ]
            }}}
        }));

        assert_eq!(data.merchant, "Whole Foods Market");
        assert_eq!(data.category, ReceiptCategory::Grocery);
        assert_eq!(data.date.as_deref(), Some("2024-03-02"));
        assert_eq!(data.total, 54.2);
        assert_eq!(data.currency, "CAD");
        assert_eq!(data.confidence, 0.96);
        assert_eq!(data.items.len(), 2);
        assert_eq!(data.items[1].quantity, 1.0);
    }

    #[test]
    fn test_missing_fields_fall_back() {
        let data = parse(serde_json::json!({
            "document": { "inference": { "prediction": {} } }
        }));

        assert_eq!(data.merchant, "Unknown");
        assert_eq!(data.category, ReceiptCategory::Other);
        assert_eq!(data.total, 0.0);
        assert_eq!(data.currency, "USD");
        assert_eq!(data.confidence, 0.0);
        assert!(data.items.is_empty());
    }

    #[test]
    fn test_quality_report_flags_problems() {
        let data = parse(serde_json::json!({
            "document": { "inference": { "prediction": {
                "supplier_name": { "value": "Unknown", "confidence": 0.2 }
            }}}
        }));
        let report = validate_receipt_data(&data);

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 3);
    }

    #[test]
    fn test_quality_report_accepts_clean_receipt() {
        let data = ReceiptData {
            merchant: "Target".to_string(),
            category: ReceiptCategory::Retail,
            date: None,
            total: 12.5,
            currency: "USD".to_string(),
            confidence: 0.8,
            items: Vec::new(),
        };
        assert!(validate_receipt_data(&data).valid);
    }

    async fn stub_mindee() -> String {
        use axum::http::{HeaderMap, StatusCode};
        use axum::routing::post;
        use axum::{Json, Router};

        async fn predict(
            headers: HeaderMap,
            Json(body): Json<serde_json::Value>,
        ) -> Result<Json<serde_json::Value>, StatusCode> {
            let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
            if auth != Some("Token key-1") {
                return Err(StatusCode::UNAUTHORIZED);
            }
            assert_eq!(body["document"], "https://x/1.jpg");
            Ok(Json(serde_json::json!({
                "document": { "inference": { "prediction": {
                    "supplier_name": { "value": "Best Buy", "confidence": 0.9 },
                    "total_amount": { "value": 100.0, "confidence": 0.9 }
                }}}
            })))
        }

        let app = Router::new()
            .route("/predict", post(predict))
            .route("/down", post(|| async { StatusCode::BAD_GATEWAY }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_extract_sends_token_and_maps_response() {
        let base = stub_mindee().await;
        let client =
            MindeeClient::new("key-1".to_string()).with_endpoint(format!("{base}/predict"));

        let data = client.extract_receipt_data("https://x/1.jpg").await.unwrap();
        assert_eq!(data.merchant, "Best Buy");
        assert_eq!(data.category, ReceiptCategory::Electronics);
        assert_eq!(data.total, 100.0);
    }

    #[tokio::test]
    async fn test_http_errors_fail_the_stage() {
        let base = stub_mindee().await;

        let unauthorized =
            MindeeClient::new("wrong".to_string()).with_endpoint(format!("{base}/predict"));
        assert!(matches!(
            unauthorized.extract_receipt_data("https://x/1.jpg").await,
            Err(StageError::Ocr(_))
        ));

        let down = MindeeClient::new("key-1".to_string()).with_endpoint(format!("{base}/down"));
        assert!(down.extract("https://x/1.jpg").await.is_err());
    }
}
