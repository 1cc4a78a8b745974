use serde::Deserialize;
use std::time::Duration;

use crate::services::encryption::{EncryptionError, TokenCipher};
use crate::services::tokens::JwtSigner;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis host for the job store
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port for the job store
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Key prefix of the queue in Redis
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus scrape address of the worker process
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// PostgreSQL connection string. Required by the worker.
    pub database_url: Option<String>,

    /// Mindee receipt OCR API key
    #[serde(default)]
    pub mindee_api_key: String,

    /// How long an active job may go without reporting progress
    #[serde(default = "default_stall_interval_ms")]
    pub stall_interval_ms: u64,

    /// Worker idle poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// AES-256-GCM key for OAuth tokens (base64-encoded, 32 bytes)
    pub encryption_key: Option<String>,

    /// HS256 secret for session tokens
    pub jwt_secret: Option<String>,

    #[serde(default = "default_jwt_expires_in_secs")]
    pub jwt_expires_in_secs: i64,
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_queue_name() -> String {
    "receipt-processing".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_stall_interval_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_jwt_expires_in_secs() -> i64 {
    7 * 24 * 60 * 60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }

    pub fn stall_interval(&self) -> Duration {
        Duration::from_millis(self.stall_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `None` when `ENCRYPTION_KEY` is unset.
    pub fn token_cipher(&self) -> Result<Option<TokenCipher>, EncryptionError> {
        self.encryption_key
            .as_deref()
            .map(TokenCipher::new)
            .transpose()
    }

    pub fn jwt_signer(&self) -> Option<JwtSigner> {
        self.jwt_secret.as_deref().map(|secret| {
            JwtSigner::new(
                secret,
                chrono::Duration::seconds(self.jwt_expires_in_secs),
            )
        })
    }
}
