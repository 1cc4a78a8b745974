//! HTTP API tests. Each test serves the router on an ephemeral port over
//! an in-memory job store and talks to it with a real client.

use receipt_queue::app_state::AppState;
use receipt_queue::routes;
use receipt_queue::services::queue::ReceiptQueue;
use receipt_queue::store::MemoryJobStore;
use serde_json::{json, Value};
use std::sync::Arc;

async fn spawn_app() -> String {
    let queue = ReceiptQueue::new(Arc::new(MemoryJobStore::new()));
    let app = routes::router(AppState::new(queue));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn receipt_body(receipt_id: &str) -> Value {
    json!({
        "receiptId": receipt_id,
        "userId": "u1",
        "imageUrl": format!("https://cdn.example.com/{receipt_id}.jpg"),
        "imagePath": format!("/var/uploads/{receipt_id}.jpg"),
    })
}

#[tokio::test]
async fn test_submit_then_poll_status() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/api/v1/receipts/jobs"))
        .json(&receipt_body("r1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 202);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["state"], "waiting");
    let job_id = body["jobId"].as_str().unwrap().to_string();
    assert!(!job_id.is_empty());

    let res = client
        .get(format!("{base}/api/v1/receipts/jobs/{job_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    let status: Value = res.json().await.unwrap();
    assert_eq!(status["id"], job_id);
    assert_eq!(status["state"], "waiting");
    assert_eq!(status["progress"], 0);
    assert_eq!(status["attemptsMade"], 0);
    assert_eq!(status["data"]["receiptId"], "r1");
}

#[tokio::test]
async fn test_job_ids_are_distinct() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let mut ids = Vec::new();
    for receipt_id in ["r1", "r2"] {
        let body: Value = client
            .post(format!("{base}/api/v1/receipts/jobs"))
            .json(&receipt_body(receipt_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        ids.push(body["jobId"].as_str().unwrap().to_string());
    }
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_invalid_payload_rejected() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let mut missing_user = receipt_body("r1");
    missing_user["userId"] = json!("");
    let res = client
        .post(format!("{base}/api/v1/receipts/jobs"))
        .json(&missing_user)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 422);
    let body: Value = res.json().await.unwrap();
    assert!(!body["error"].as_str().unwrap().is_empty());

    let mut bad_scheme = receipt_body("r1");
    bad_scheme["imageUrl"] = json!("ftp://cdn.example.com/r1.jpg");
    let res = client
        .post(format!("{base}/api/v1/receipts/jobs"))
        .json(&bad_scheme)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 422);
}

#[tokio::test]
async fn test_unreadable_payload_gets_json_error() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let mut missing_field = receipt_body("r1");
    missing_field.as_object_mut().unwrap().remove("imagePath");
    let res = client
        .post(format!("{base}/api/v1/receipts/jobs"))
        .json(&missing_field)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 422);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("imagePath"));

    let res = client
        .post(format!("{base}/api/v1/receipts/jobs"))
        .header("content-type", "application/json")
        .body("{\"receiptId\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let base = spawn_app().await;

    let res = reqwest::get(format!("{base}/api/v1/receipts/jobs/999"))
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 404);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_health_reports_queue_depth() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/v1/receipts/jobs"))
        .json(&receipt_body("r1"))
        .send()
        .await
        .unwrap();

    let res = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(res.status().as_u16(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["redis"]["status"], "ok");
    assert_eq!(body["jobs"]["waiting"], 1);
}
