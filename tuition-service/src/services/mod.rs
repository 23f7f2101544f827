//! Services module for tuition-service.

pub mod confirmation;
pub mod database;
pub mod metrics;

pub use confirmation::{confirm_payment, ConfirmationReceipt};
pub use database::{Database, InsertOutcome};
pub use metrics::{
    get_metrics, init_metrics, record_error, record_invoice_created, record_job_item,
    record_transition, record_webhook_delivery,
};
