//! Payment confirmation gateway.
//!
//! Reconciles inbound payment-gateway webhook deliveries into invoice state
//! exactly once per logical event, despite at-least-once delivery. The
//! `(provider, event_id)` unique row plus a compare-and-set claim are the
//! idempotency boundary; the ledger transition itself is guarded by the
//! status state machine.

use crate::config::WebhookConfig;
use crate::models::{
    AuditActor, ConfirmOutcome, Invoice, InvoiceStatus, WebhookDelivery, WebhookEvent,
    WebhookEventStatus,
};
use crate::money::{apply_percentage, select_early_discount};
use crate::services::database::Database;
use crate::services::metrics::{record_error, record_webhook_delivery};
use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Event types this engine reconciles. Anything else is acknowledged and
/// ignored.
const EVENT_PAYMENT_CONFIRMED: &str = "payment_confirmed";
const EVENT_PAYMENT_REFUNDED: &str = "payment_refunded";
const EVENT_CHARGEBACK: &str = "chargeback";

/// What the webhook route reports back to the gateway.
#[derive(Debug)]
pub struct ConfirmationReceipt {
    pub outcome: ConfirmOutcome,
    /// For `Failed`: whether the event is still under the attempt ceiling.
    /// Drives 5xx (redeliver) vs 2xx (stop) on the route.
    pub retryable: bool,
    pub error: Option<String>,
}

impl ConfirmationReceipt {
    fn ok(outcome: ConfirmOutcome) -> Self {
        Self {
            outcome,
            retryable: outcome == ConfirmOutcome::Busy,
            error: None,
        }
    }

    fn failed(retryable: bool, error: String) -> Self {
        Self {
            outcome: ConfirmOutcome::Failed,
            retryable,
            error: Some(error),
        }
    }
}

/// The fields this engine reads out of the provider-defined payload. The
/// payload stays an opaque blob beyond these; the remapping from provider
/// names to the domain's names happens here, once, at ingestion.
#[derive(Debug, Default, PartialEq)]
pub struct PaymentNotice {
    pub invoice_id: Option<Uuid>,
    pub gateway_charge_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Pull the invoice reference and payment timestamp out of a gateway payload.
/// Providers embed the invoice id in their metadata bag and call the charge
/// reference either `charge_id` or just `id`.
pub fn parse_payment_notice(payload: &serde_json::Value) -> PaymentNotice {
    let invoice_id = payload
        .pointer("/metadata/invoice_id")
        .or_else(|| payload.get("invoice_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());

    let gateway_charge_id = payload
        .get("charge_id")
        .or_else(|| payload.get("id"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let paid_at = payload
        .get("paid_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    PaymentNotice {
        invoice_id,
        gateway_charge_id,
        paid_at,
    }
}

/// Doubling backoff from the configured base; `attempts` has already been
/// incremented by the claim.
fn retry_backoff(base_seconds: i64, attempts: i32) -> Duration {
    let exponent = attempts.saturating_sub(1).clamp(0, 10) as u32;
    Duration::seconds(base_seconds.saturating_mul(1_i64 << exponent))
}

/// Process one webhook delivery end to end.
///
/// Safe to call any number of times for the same `(provider, event_id)`:
/// completed events are acknowledged without reprocessing, a concurrently
/// claimed event answers busy, and failures are retried up to the configured
/// ceiling with backoff, after which the event stays `failed` for manual
/// follow-up.
#[instrument(skip(db, cfg, delivery), fields(provider = %delivery.provider, event_id = %delivery.event_id, event_type = %delivery.event_type))]
pub async fn confirm_payment(
    db: &Database,
    cfg: &WebhookConfig,
    delivery: &WebhookDelivery,
    actor: AuditActor,
) -> Result<ConfirmationReceipt, AppError> {
    let event = db.upsert_webhook_event(delivery).await?;
    if event.status() == WebhookEventStatus::Completed {
        record_webhook_delivery(&delivery.provider, "duplicate");
        return Ok(ConfirmationReceipt::ok(ConfirmOutcome::Duplicate));
    }

    let Some(claimed) = db
        .claim_webhook_event(&delivery.provider, &delivery.event_id, cfg.max_attempts)
        .await?
    else {
        return lost_claim(db, cfg, delivery).await;
    };

    match process_event(db, &claimed, actor).await {
        Ok(()) => {
            db.complete_webhook_event(claimed.webhook_event_id).await?;
            record_webhook_delivery(&delivery.provider, "completed");
            // Downstream triggers (fiscal receipt, notification) happen after
            // the ledger transition committed and never roll it back.
            info!(
                provider = %delivery.provider,
                event_id = %delivery.event_id,
                "Webhook event processed; downstream triggers dispatched"
            );
            Ok(ConfirmationReceipt::ok(ConfirmOutcome::Completed))
        }
        Err(e) => {
            let retryable = claimed.attempts < cfg.max_attempts;
            // Past the attempt ceiling the failure is terminal: recorded as
            // such on the event row and never offered for redelivery.
            let error = if retryable {
                e
            } else {
                AppError::TerminalProcessing(anyhow::anyhow!(
                    "Gave up after {} attempts: {}",
                    claimed.attempts,
                    e
                ))
            };
            let next_retry = retryable
                .then(|| Utc::now() + retry_backoff(cfg.retry_base_seconds, claimed.attempts));
            db.fail_webhook_event(claimed.webhook_event_id, &error.to_string(), next_retry)
                .await?;
            record_webhook_delivery(&delivery.provider, "failed");
            record_error(error_kind(&error), "confirm_payment");
            warn!(
                provider = %delivery.provider,
                event_id = %delivery.event_id,
                attempts = claimed.attempts,
                retryable = retryable,
                error = %error,
                "Webhook event processing failed"
            );
            Ok(ConfirmationReceipt::failed(retryable, error.to_string()))
        }
    }
}

/// The claim was lost: decide duplicate vs busy vs exhausted from the row as
/// it stands now.
async fn lost_claim(
    db: &Database,
    cfg: &WebhookConfig,
    delivery: &WebhookDelivery,
) -> Result<ConfirmationReceipt, AppError> {
    let event = db
        .get_webhook_event(&delivery.provider, &delivery.event_id)
        .await?
        .ok_or_else(|| {
            AppError::DatabaseError(anyhow::anyhow!("Webhook event vanished after claim"))
        })?;

    let receipt = match event.status() {
        WebhookEventStatus::Completed => {
            record_webhook_delivery(&delivery.provider, "duplicate");
            ConfirmationReceipt::ok(ConfirmOutcome::Duplicate)
        }
        WebhookEventStatus::Failed if event.attempts >= cfg.max_attempts => {
            record_webhook_delivery(&delivery.provider, "exhausted");
            ConfirmationReceipt::failed(
                false,
                event
                    .error
                    .unwrap_or_else(|| "Retry ceiling reached".to_string()),
            )
        }
        // Freshly processing under another worker, or failed with the
        // backoff window still open. Abandoned `processing` rows age out of
        // this branch: past the staleness window the claim takes them.
        _ => {
            record_webhook_delivery(&delivery.provider, "busy");
            ConfirmationReceipt::ok(ConfirmOutcome::Busy)
        }
    };

    Ok(receipt)
}

/// Steps 3-4 of the pipeline: resolve the invoice and apply the ledger
/// transition. Any error here is recorded on the event row by the caller.
async fn process_event(
    db: &Database,
    event: &WebhookEvent,
    actor: AuditActor,
) -> Result<(), AppError> {
    match event.event_type.as_str() {
        EVENT_PAYMENT_CONFIRMED => {
            let notice = parse_payment_notice(&event.payload);
            let invoice = resolve_invoice(db, event, &notice).await?;
            let paid_at = notice.paid_at.unwrap_or_else(Utc::now);
            let discount = early_discount_for(db, &invoice, paid_at).await?;
            db.transition_invoice(
                invoice.invoice_id,
                InvoiceStatus::Paid,
                actor,
                Some("Payment confirmed by gateway"),
                Some(paid_at),
                discount,
            )
            .await?;
            Ok(())
        }
        EVENT_PAYMENT_REFUNDED | EVENT_CHARGEBACK => {
            let notice = parse_payment_notice(&event.payload);
            let invoice = resolve_invoice(db, event, &notice).await?;
            let observation = format!("Payment reversed by gateway ({})", event.event_type);
            db.transition_invoice(
                invoice.invoice_id,
                InvoiceStatus::NotPaid,
                actor,
                Some(&observation),
                None,
                None,
            )
            .await?;
            Ok(())
        }
        other => {
            // Not ours to reconcile; acknowledge so the gateway stops.
            info!(event_type = %other, "Ignoring unhandled webhook event type");
            Ok(())
        }
    }
}

async fn resolve_invoice(
    db: &Database,
    event: &WebhookEvent,
    notice: &PaymentNotice,
) -> Result<Invoice, AppError> {
    db.find_invoice_for_payment(notice.invoice_id, notice.gateway_charge_id.as_deref())
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No invoice matches webhook event {}/{}",
                event.provider,
                event.provider_event_id
            ))
        })
}

/// Early-payment discount, at most once per invoice: skipped when a discount
/// is already on the ledger row, capped at the base amount so the total can
/// never go negative.
async fn early_discount_for(
    db: &Database,
    invoice: &Invoice,
    paid_at: DateTime<Utc>,
) -> Result<Option<i64>, AppError> {
    if invoice.discount_amount_cents > 0 {
        return Ok(None);
    }

    let days_early = invoice
        .due_date
        .signed_duration_since(paid_at.date_naive())
        .num_days();
    if days_early <= 0 {
        return Ok(None);
    }

    let Some(terms) = db.get_contract_terms(invoice.contract_id).await? else {
        return Ok(None);
    };
    let Some(tier) = select_early_discount(&terms.early_discounts, days_early) else {
        return Ok(None);
    };

    let discount =
        apply_percentage(invoice.base_amount_cents, tier.percentage).min(invoice.base_amount_cents);
    info!(
        invoice_id = %invoice.invoice_id,
        days_early = days_early,
        percentage = %tier.percentage,
        discount_cents = discount,
        "Early-payment discount selected"
    );
    Ok(Some(discount))
}

fn error_kind(e: &AppError) -> &'static str {
    match e {
        AppError::ValidationError(_) => "validation",
        AppError::NotFound(_) => "not_found",
        AppError::Conflict(_) => "conflict",
        AppError::TerminalProcessing(_) => "terminal",
        AppError::DatabaseError(_) => "database",
        _ => "internal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notice_prefers_metadata_invoice_id() {
        let id = Uuid::new_v4();
        let payload = json!({
            "id": "ch_123",
            "metadata": { "invoice_id": id.to_string() }
        });
        let notice = parse_payment_notice(&payload);
        assert_eq!(notice.invoice_id, Some(id));
        assert_eq!(notice.gateway_charge_id.as_deref(), Some("ch_123"));
    }

    #[test]
    fn notice_falls_back_to_charge_id_field() {
        let payload = json!({ "charge_id": "ch_456", "id": "evt_1" });
        let notice = parse_payment_notice(&payload);
        assert!(notice.invoice_id.is_none());
        assert_eq!(notice.gateway_charge_id.as_deref(), Some("ch_456"));
    }

    #[test]
    fn notice_parses_gateway_timestamp() {
        let payload = json!({ "paid_at": "2024-03-10T12:30:00Z" });
        let notice = parse_payment_notice(&payload);
        assert_eq!(
            notice.paid_at.unwrap().to_rfc3339(),
            "2024-03-10T12:30:00+00:00"
        );
    }

    #[test]
    fn notice_tolerates_garbage() {
        let payload = json!({ "invoice_id": 42, "paid_at": "yesterday" });
        let notice = parse_payment_notice(&payload);
        assert_eq!(notice, PaymentNotice::default());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(retry_backoff(30, 1), Duration::seconds(30));
        assert_eq!(retry_backoff(30, 2), Duration::seconds(60));
        assert_eq!(retry_backoff(30, 3), Duration::seconds(120));
        assert_eq!(retry_backoff(30, 5), Duration::seconds(480));
    }

    #[test]
    fn backoff_exponent_is_capped() {
        // Deep attempt counts must not overflow the shift.
        assert_eq!(retry_backoff(30, 200), Duration::seconds(30 * 1024));
    }
}
