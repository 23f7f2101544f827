//! Scheduled batch jobs: installment generation and late-interest accrual.
//!
//! Both jobs are safe to re-run and to run concurrently with themselves; the
//! database constraints arbitrate races, and a single bad item never aborts
//! the batch.

mod accrual;
mod generator;

pub use accrual::{apply_invoice_interest, AccrualSummary};
pub use generator::{generate_missing_payments, GenerationSummary};
