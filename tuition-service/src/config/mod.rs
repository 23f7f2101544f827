use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use service_core::config::Config as CommonConfig;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct TuitionConfig {
    pub common: CommonConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Retry policy for failed webhook events.
#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Ceiling on processing attempts; past it the event stays `failed`.
    pub max_attempts: i32,
    /// Base of the doubling backoff schedule, in seconds.
    pub retry_base_seconds: i64,
}

impl TuitionConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let port = env::var("TUITION_SERVICE_PORT")
            .unwrap_or_else(|_| "3006".to_string())
            .parse()?;

        let db_url = env::var("TUITION_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("TUITION_DATABASE_URL must be set"))?;
        let max_connections = env::var("TUITION_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("TUITION_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let max_attempts = env::var("TUITION_WEBHOOK_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()?;
        let retry_base_seconds = env::var("TUITION_WEBHOOK_RETRY_BASE_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;

        let log_level = env::var("TUITION_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let otlp_endpoint = env::var("TUITION_OTLP_ENDPOINT").ok();

        Ok(Self {
            common: CommonConfig { port },
            service_name: "tuition-service".to_string(),
            log_level,
            otlp_endpoint,
            database: DatabaseConfig {
                url: db_url,
                max_connections,
                min_connections,
            },
            webhook: WebhookConfig {
                max_attempts,
                retry_base_seconds,
            },
        })
    }
}
