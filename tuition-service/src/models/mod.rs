//! Domain models for tuition-service.

mod contract;
mod history;
mod invoice;
mod webhook;

pub use contract::{ActiveEnrollment, Contract, ContractTerms, EarlyDiscountTier, InterestConfig};
pub use history::{AuditActor, StatusHistoryEntry};
pub use invoice::{CreateInvoice, Invoice, InvoiceStatus, InvoiceType, ListInvoicesFilter};
pub use webhook::{ConfirmOutcome, WebhookDelivery, WebhookEvent, WebhookEventStatus};
