//! Metrics module for tuition-service.
//! Prometheus metrics for the invoice ledger, batch jobs and webhook intake.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "tuition_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Invoices created counter
pub static INVOICES_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Ledger status transitions counter
pub static TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Batch job run counter with per-outcome counts
pub static JOB_ITEMS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Webhook deliveries counter
pub static WEBHOOK_DELIVERIES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    INVOICES_CREATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "tuition_invoices_created_total",
                "Total invoices created by type"
            ),
            &["invoice_type"]
        )
        .expect("Failed to register INVOICES_CREATED_TOTAL")
    });

    TRANSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "tuition_status_transitions_total",
                "Total ledger status transitions"
            ),
            &["from", "to"]
        )
        .expect("Failed to register TRANSITIONS_TOTAL")
    });

    JOB_ITEMS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "tuition_job_items_total",
                "Batch job items by job and outcome"
            ),
            &["job", "outcome"]
        )
        .expect("Failed to register JOB_ITEMS_TOTAL")
    });

    WEBHOOK_DELIVERIES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "tuition_webhook_deliveries_total",
                "Webhook deliveries by provider and outcome"
            ),
            &["provider", "outcome"]
        )
        .expect("Failed to register WEBHOOK_DELIVERIES_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("tuition_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a created invoice.
pub fn record_invoice_created(invoice_type: &str) {
    if let Some(counter) = INVOICES_CREATED_TOTAL.get() {
        counter.with_label_values(&[invoice_type]).inc();
    }
}

/// Record a ledger status transition.
pub fn record_transition(from: &str, to: &str) {
    if let Some(counter) = TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[from, to]).inc();
    }
}

/// Record one batch-job item outcome.
pub fn record_job_item(job: &str, outcome: &str) {
    if let Some(counter) = JOB_ITEMS_TOTAL.get() {
        counter.with_label_values(&[job, outcome]).inc();
    }
}

/// Record a webhook delivery outcome.
pub fn record_webhook_delivery(provider: &str, outcome: &str) {
    if let Some(counter) = WEBHOOK_DELIVERIES_TOTAL.get() {
        counter.with_label_values(&[provider, outcome]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
