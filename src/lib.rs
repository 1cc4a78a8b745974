//! Receipt processing queue
//!
//! Uploaded receipts are queued in Redis and processed by worker processes
//! through a fixed pipeline: OCR extraction, fraud scoring, earnings
//! calculation, receipt status update and user balance credit. Failed
//! attempts are retried with exponential backoff.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
