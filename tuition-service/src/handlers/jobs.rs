//! Manual triggers for the batch jobs. In deployment these routes sit behind
//! the internal network and are hit by the scheduler.

use axum::{extract::State, response::IntoResponse, Json};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::jobs::{apply_invoice_interest, generate_missing_payments};
use crate::models::AuditActor;
use crate::startup::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct GenerateRequest {
    pub school_id: Option<Uuid>,
    /// Billing period to generate, as any date inside the month. Defaults to
    /// the current month.
    pub reference: Option<NaiveDate>,
}

/// POST /jobs/generate-payments
pub async fn run_generate_payments(
    State(state): State<AppState>,
    body: Option<Json<GenerateRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let reference = request.reference.unwrap_or_else(|| Utc::now().date_naive());

    let summary = generate_missing_payments(&state.db, request.school_id, reference).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize, Default)]
pub struct AccrualRequest {
    /// Day to accrue up to. Defaults to today; earlier dates support
    /// backfill verification.
    pub as_of: Option<NaiveDate>,
}

/// POST /jobs/apply-interest
pub async fn run_apply_interest(
    State(state): State<AppState>,
    body: Option<Json<AccrualRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let as_of = request.as_of.unwrap_or_else(|| Utc::now().date_naive());

    let summary =
        apply_invoice_interest(&state.db, as_of, AuditActor::INTEREST_ACCRUAL).await?;
    Ok(Json(summary))
}
