//! Invoice aggregate and its status state machine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Tuition,
    Upfront,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Tuition => "tuition",
            InvoiceType::Upfront => "upfront",
        }
    }
}

/// Invoice status.
///
/// `Overdue` is advisory, set by the interest accrual job; payment still
/// transitions it to `Paid`. `Cancelled` and `Renegotiated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    NotPaid,
    Paid,
    Overdue,
    Cancelled,
    Renegotiated,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::NotPaid => "not_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Renegotiated => "renegotiated",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" => InvoiceStatus::Paid,
            "overdue" => InvoiceStatus::Overdue,
            "cancelled" => InvoiceStatus::Cancelled,
            "renegotiated" => InvoiceStatus::Renegotiated,
            _ => InvoiceStatus::NotPaid,
        }
    }

    /// Terminal states block every further mutation; a replacement invoice is
    /// created instead (the generator's uniqueness check excludes them).
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Cancelled | InvoiceStatus::Renegotiated)
    }

    /// The transition table. `Paid -> NotPaid` is the refund/chargeback
    /// reversal and is the only way out of `Paid`.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (NotPaid, Paid)
                | (NotPaid, Overdue)
                | (NotPaid, Cancelled)
                | (NotPaid, Renegotiated)
                | (Overdue, Paid)
                | (Overdue, Cancelled)
                | (Overdue, Renegotiated)
                | (Paid, NotPaid)
        )
    }
}

/// The invoice / student-payment aggregate. All monetary fields are integer
/// minor units in a single currency.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub student_id: Uuid,
    pub contract_id: Uuid,
    /// Enrollment-period scoping; nullable for upfront charges.
    pub student_has_level_id: Option<Uuid>,
    pub invoice_type: String,
    pub month: i32,
    pub year: i32,
    pub due_date: NaiveDate,
    pub base_amount_cents: i64,
    pub discount_amount_cents: i64,
    pub fine_amount_cents: i64,
    pub interest_amount_cents: i64,
    /// Invariant: `total = base - discount + fine + interest`, never negative.
    pub total_amount_cents: i64,
    pub status: String,
    pub installments: i32,
    pub installment_number: i32,
    pub paid_utc: Option<DateTime<Utc>>,
    /// Accrual watermark; an optimization marker, not a correctness gate.
    pub last_interest_applied_on: Option<NaiveDate>,
    pub gateway_charge_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// Input for inserting a new invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub student_id: Uuid,
    pub contract_id: Uuid,
    pub student_has_level_id: Option<Uuid>,
    pub invoice_type: InvoiceType,
    pub month: i32,
    pub year: i32,
    pub due_date: NaiveDate,
    pub base_amount_cents: i64,
    pub installments: i32,
    pub installment_number: i32,
    pub gateway_charge_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub student_has_level_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub month: Option<i32>,
    pub year: Option<i32>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
