//! Webhook event bookkeeping for the payment confirmation gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Webhook event processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WebhookEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventStatus::Pending => "pending",
            WebhookEventStatus::Processing => "processing",
            WebhookEventStatus::Completed => "completed",
            WebhookEventStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "processing" => WebhookEventStatus::Processing,
            "completed" => WebhookEventStatus::Completed,
            "failed" => WebhookEventStatus::Failed,
            _ => WebhookEventStatus::Pending,
        }
    }
}

/// One received gateway event. `(provider, provider_event_id)` is unique, so
/// at-least-once delivery collapses to at-most-once processing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookEvent {
    pub webhook_event_id: Uuid,
    pub provider: String,
    pub provider_event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub error: Option<String>,
    pub next_retry_utc: Option<DateTime<Utc>>,
    pub processed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn status(&self) -> WebhookEventStatus {
        WebhookEventStatus::from_string(&self.status)
    }
}

/// One inbound delivery, as handed over by the routing layer after signature
/// verification.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookDelivery {
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Outcome of processing one delivery. Drives the HTTP status the route
/// answers with, which in turn drives the gateway's own retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOutcome {
    /// Processed now, or processing previously succeeded.
    Completed,
    /// Already completed; delivery acknowledged without reprocessing.
    Duplicate,
    /// A concurrent worker holds the event, or its backoff window is still
    /// open; the gateway should redeliver later.
    Busy,
    /// Processing failed; `attempts` and `error` recorded on the event row.
    Failed,
}
