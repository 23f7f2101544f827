//! Invoice read model and manual ledger transitions.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{AuditActor, Invoice, InvoiceStatus, ListInvoicesFilter};
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct ListInvoicesParams {
    pub student_has_level_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub status: Option<String>,
    pub month: Option<i32>,
    pub year: Option<i32>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ListInvoicesResponse {
    pub invoices: Vec<Invoice>,
    pub next_page_token: Option<Uuid>,
}

/// GET /invoices
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(params): Query<ListInvoicesParams>,
) -> Result<impl IntoResponse, AppError> {
    let status = match params.status.as_deref() {
        Some(s) => Some(parse_status(s)?),
        None => None,
    };
    let filter = ListInvoicesFilter {
        student_has_level_id: params.student_has_level_id,
        student_id: params.student_id,
        status,
        month: params.month,
        year: params.year,
        page_size: params.page_size.unwrap_or(20),
        page_token: params.page_token,
    };

    let invoices = state.db.list_invoices(&filter).await?;
    let next_page_token = if invoices.len() as i32 >= filter.page_size.clamp(1, 100) {
        invoices.last().map(|i| i.invoice_id)
    } else {
        None
    };

    Ok(Json(ListInvoicesResponse {
        invoices,
        next_page_token,
    }))
}

/// GET /invoices/:id
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;
    Ok(Json(invoice))
}

/// GET /invoices/:id/history
pub async fn get_invoice_history(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    // 404 for a phantom invoice, empty list for a real one with no
    // transitions yet.
    state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;

    let history = state.db.get_invoice_history(invoice_id).await?;
    Ok(Json(history))
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    /// Operator performing the change; recorded in the history trail.
    pub user_id: Uuid,
    pub observation: Option<String>,
}

/// POST /invoices/:id/cancel
pub async fn cancel_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state
        .db
        .transition_invoice(
            invoice_id,
            InvoiceStatus::Cancelled,
            AuditActor::User(request.user_id),
            request.observation.as_deref(),
            None,
            None,
        )
        .await?;
    Ok(Json(invoice))
}

/// POST /invoices/:id/renegotiate
///
/// Marks the installment as replaced by a renegotiated agreement. The
/// replacement invoices are created by a later generation run once the new
/// contract terms are in place.
pub async fn renegotiate_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state
        .db
        .transition_invoice(
            invoice_id,
            InvoiceStatus::Renegotiated,
            AuditActor::User(request.user_id),
            request.observation.as_deref(),
            None,
            None,
        )
        .await?;
    Ok(Json(invoice))
}

fn parse_status(s: &str) -> Result<InvoiceStatus, AppError> {
    match s {
        "not_paid" => Ok(InvoiceStatus::NotPaid),
        "paid" => Ok(InvoiceStatus::Paid),
        "overdue" => Ok(InvoiceStatus::Overdue),
        "cancelled" => Ok(InvoiceStatus::Cancelled),
        "renegotiated" => Ok(InvoiceStatus::Renegotiated),
        other => Err(AppError::BadRequest(anyhow::anyhow!(
            "Unknown invoice status '{}'",
            other
        ))),
    }
}
