pub mod invoices;
pub mod jobs;
pub mod webhooks;

pub use invoices::{cancel_invoice, get_invoice, get_invoice_history, list_invoices, renegotiate_invoice};
pub use jobs::{run_apply_interest, run_generate_payments};
pub use webhooks::{get_webhook_event, receive_webhook};
