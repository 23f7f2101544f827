use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{AuditActor, Invoice, InterestConfig};
use crate::money::accrue_interest;
use crate::services::{record_job_item, Database};

const JOB_NAME: &str = "interest_accrual";

/// Result counts for one accrual run.
#[derive(Debug, Serialize)]
pub struct AccrualSummary {
    pub processed: usize,
    pub updated: usize,
    pub errors: usize,
}

/// Marks every unpaid invoice past its due date as overdue and recomputes
/// its fine and interest from the contract terms.
///
/// Penalties are always recomputed from the base amount for the current day
/// count, never added on top of the stored values, so running the job twice
/// for the same day (or after missed days) converges on the same totals. The
/// per-invoice watermark short-circuits invoices already settled for today.
#[instrument(skip(db), fields(as_of = %today))]
pub async fn apply_invoice_interest(
    db: &Database,
    today: NaiveDate,
    actor: AuditActor,
) -> Result<AccrualSummary, AppError> {
    let invoices = db.find_overdue_unpaid(today).await?;

    let mut summary = AccrualSummary {
        processed: invoices.len(),
        updated: 0,
        errors: 0,
    };
    let mut interest_cache: HashMap<Uuid, Option<InterestConfig>> = HashMap::new();

    for invoice in &invoices {
        if invoice.last_interest_applied_on == Some(today) {
            record_job_item(JOB_NAME, "skipped");
            continue;
        }

        match accrue_for_invoice(db, invoice, today, actor, &mut interest_cache).await {
            Ok(true) => {
                summary.updated += 1;
                record_job_item(JOB_NAME, "updated");
            }
            // Lost the race to a payment or cancellation between the scan
            // and the row lock.
            Ok(false) => record_job_item(JOB_NAME, "skipped"),
            Err(e) => {
                summary.errors += 1;
                record_job_item(JOB_NAME, "error");
                warn!(
                    invoice_id = %invoice.invoice_id,
                    error = %e,
                    "Failed to apply interest to invoice"
                );
            }
        }
    }

    info!(
        processed = summary.processed,
        updated = summary.updated,
        errors = summary.errors,
        "Interest accrual run finished"
    );
    Ok(summary)
}

async fn accrue_for_invoice(
    db: &Database,
    invoice: &Invoice,
    today: NaiveDate,
    actor: AuditActor,
    interest_cache: &mut HashMap<Uuid, Option<InterestConfig>>,
) -> Result<bool, AppError> {
    let config = match interest_cache.get(&invoice.contract_id) {
        Some(cached) => cached.clone(),
        None => {
            let terms = db.get_contract_terms(invoice.contract_id).await?;
            let config = terms.and_then(|t| t.interest);
            interest_cache.insert(invoice.contract_id, config.clone());
            config
        }
    };

    let days_late = (today - invoice.due_date).num_days();
    // A contract without penalty terms still flips the invoice to overdue,
    // it just never costs anything extra.
    let (fine_cents, interest_cents) = match &config {
        Some(cfg) => accrue_interest(cfg, invoice.base_amount_cents, days_late),
        None => (0, 0),
    };

    db.apply_accrual(invoice.invoice_id, fine_cents, interest_cents, today, actor)
        .await
}
