use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{ActiveEnrollment, CreateInvoice, InvoiceType};
use crate::money::{apply_percentage, compute_due_date};
use crate::services::{record_invoice_created, record_job_item, Database, InsertOutcome};

const JOB_NAME: &str = "schedule_generator";

/// Result counts for one generation run.
#[derive(Debug, Serialize)]
pub struct GenerationSummary {
    pub total: usize,
    pub created: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Creates the tuition invoice for the reference month for every active
/// enrollment that does not already have one.
///
/// Re-running with the same reference is a no-op for enrollments already
/// covered: the partial unique index on `(student_has_level_id, month, year)`
/// turns concurrent duplicates into skips instead of double billing. A
/// failure on one enrollment is counted and logged but never stops the rest
/// of the batch.
#[instrument(skip(db), fields(month = reference.month(), year = reference.year()))]
pub async fn generate_missing_payments(
    db: &Database,
    school_id: Option<Uuid>,
    reference: NaiveDate,
) -> Result<GenerationSummary, AppError> {
    let enrollments = db.list_active_enrollments(school_id).await?;
    let month = reference.month() as i32;
    let year = reference.year();

    let mut summary = GenerationSummary {
        total: enrollments.len(),
        created: 0,
        skipped: 0,
        errors: 0,
    };

    for enrollment in &enrollments {
        match generate_for_enrollment(db, enrollment, month, year).await {
            Ok(InsertOutcome::Created(invoice)) => {
                summary.created += 1;
                record_invoice_created(InvoiceType::Tuition.as_str());
                record_job_item(JOB_NAME, "created");
                info!(
                    invoice_id = %invoice.invoice_id,
                    student_has_level_id = %enrollment.student_has_level_id,
                    "Created tuition invoice"
                );
            }
            Ok(InsertOutcome::AlreadyExists) => {
                summary.skipped += 1;
                record_job_item(JOB_NAME, "skipped");
            }
            Err(e) => {
                summary.errors += 1;
                record_job_item(JOB_NAME, "error");
                warn!(
                    student_has_level_id = %enrollment.student_has_level_id,
                    contract_id = %enrollment.contract_id,
                    error = %e,
                    "Failed to generate invoice for enrollment"
                );
            }
        }
    }

    info!(
        total = summary.total,
        created = summary.created,
        skipped = summary.skipped,
        errors = summary.errors,
        "Schedule generation run finished"
    );
    Ok(summary)
}

async fn generate_for_enrollment(
    db: &Database,
    enrollment: &ActiveEnrollment,
    month: i32,
    year: i32,
) -> Result<InsertOutcome, AppError> {
    let terms = db
        .get_contract_terms(enrollment.contract_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Contract {} not found for enrollment {}",
                enrollment.contract_id,
                enrollment.student_has_level_id
            ))
        })?;

    let due_date = compute_due_date(month as u32, year, terms.contract.payment_day as u32);

    // Standing scholarship comes off the list price before the invoice is
    // cut; early-payment discounts are resolved later, at confirmation time.
    let scholarship = apply_percentage(
        enrollment.monthly_amount_cents,
        enrollment.discount_percentage,
    );
    let base_amount_cents = enrollment.monthly_amount_cents - scholarship;
    if base_amount_cents < 0 {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "Scholarship of {}% drives invoice below zero for enrollment {}",
            enrollment.discount_percentage,
            enrollment.student_has_level_id
        )));
    }

    db.create_invoice(&CreateInvoice {
        student_id: enrollment.student_id,
        contract_id: enrollment.contract_id,
        student_has_level_id: Some(enrollment.student_has_level_id),
        invoice_type: InvoiceType::Tuition,
        month,
        year,
        due_date,
        base_amount_cents,
        installments: terms.contract.installments,
        installment_number: month,
        gateway_charge_id: None,
        metadata: None,
    })
    .await
}
