//! Inbound payment-gateway webhook route.
//!
//! The answer code is the contract with the gateway: 2xx stops redelivery,
//! anything else asks for another attempt. An event that exhausted its
//! attempt budget is therefore acknowledged with 200 even though it failed,
//! and its terminal state stays queryable on the event row.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::models::{AuditActor, ConfirmOutcome, WebhookDelivery};
use crate::services::confirm_payment;
use crate::startup::AppState;

/// POST /webhooks/:provider
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let event_id = body
        .get("id")
        .or_else(|| body.get("event_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Webhook payload is missing an event id"))
        })?
        .to_string();
    let event_type = body
        .get("type")
        .or_else(|| body.get("event_type"))
        .or_else(|| body.get("event"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let delivery = WebhookDelivery {
        provider,
        event_id,
        event_type,
        payload: body,
    };

    let receipt = confirm_payment(
        &state.db,
        &state.config.webhook,
        &delivery,
        AuditActor::PAYMENT_GATEWAY,
    )
    .await?;

    let status = match receipt.outcome {
        ConfirmOutcome::Completed | ConfirmOutcome::Duplicate => StatusCode::OK,
        ConfirmOutcome::Busy => StatusCode::SERVICE_UNAVAILABLE,
        ConfirmOutcome::Failed if receipt.retryable => StatusCode::INTERNAL_SERVER_ERROR,
        ConfirmOutcome::Failed => StatusCode::OK,
    };

    Ok((
        status,
        Json(json!({
            "outcome": receipt.outcome,
            "error": receipt.error,
        })),
    ))
}

/// GET /webhooks/:provider/events/:event_id
pub async fn get_webhook_event(
    State(state): State<AppState>,
    Path((provider, event_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let event = state
        .db
        .get_webhook_event(&provider, &event_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Webhook event {}/{} not found",
                provider,
                event_id
            ))
        })?;
    Ok(Json(event))
}
