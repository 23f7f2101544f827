//! Interest accrual integration tests.

mod common;

use chrono::NaiveDate;
use common::TestApp;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// One enrollment with a January invoice due on the 10th, base 100,000 cents,
/// 2% fine and 0.1% per day late.
async fn seed_overdue_invoice(app: &TestApp) -> Uuid {
    let contract_id = app.seed_contract(10, 12).await;
    app.seed_interest(contract_id, dec!(2), dec!(0.1)).await;
    let enrollment_id = app.seed_enrollment(contract_id, 100_000, dec!(0), true).await;
    app.run_generation(date(2024, 1, 1)).await;
    enrollment_id
}

#[tokio::test]
async fn late_invoice_accrues_fine_and_daily_interest() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let enrollment_id = seed_overdue_invoice(&app).await;

    // 10 days past the 2024-01-10 due date.
    let summary = app.run_accrual(date(2024, 1, 20)).await;
    assert_eq!(summary["processed"], 1);
    assert_eq!(summary["updated"], 1);
    assert_eq!(summary["errors"], 0);

    let invoice = app.invoice_for_enrollment(enrollment_id).await;
    assert_eq!(invoice.status, "overdue");
    assert_eq!(invoice.fine_amount_cents, 2_000); // 2% of 100,000
    assert_eq!(invoice.interest_amount_cents, 1_000); // 0.1% * 10 days
    assert_eq!(invoice.total_amount_cents, 103_000);
    assert_eq!(invoice.last_interest_applied_on, Some(date(2024, 1, 20)));

    // Exactly one not_paid -> overdue transition in the trail.
    assert_eq!(app.history_count(invoice.invoice_id, "overdue").await, 1);

    app.cleanup().await;
}

#[tokio::test]
async fn same_day_rerun_is_a_no_op() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let enrollment_id = seed_overdue_invoice(&app).await;

    app.run_accrual(date(2024, 1, 15)).await;
    let rerun = app.run_accrual(date(2024, 1, 15)).await;
    assert_eq!(rerun["processed"], 1);
    assert_eq!(rerun["updated"], 0);

    let invoice = app.invoice_for_enrollment(enrollment_id).await;
    assert_eq!(invoice.interest_amount_cents, 500); // 0.1% * 5 days, once

    app.cleanup().await;
}

#[tokio::test]
async fn accrual_recomputes_instead_of_compounding() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let enrollment_id = seed_overdue_invoice(&app).await;

    app.run_accrual(date(2024, 1, 20)).await;
    app.run_accrual(date(2024, 1, 30)).await;

    let invoice = app.invoice_for_enrollment(enrollment_id).await;
    // 20 days late: still 0.1% of the base per day, never interest on
    // interest, and the fine is charged once.
    assert_eq!(invoice.fine_amount_cents, 2_000);
    assert_eq!(invoice.interest_amount_cents, 2_000);
    assert_eq!(invoice.total_amount_cents, 104_000);

    // The overdue transition was recorded on the first run only.
    assert_eq!(app.history_count(invoice.invoice_id, "overdue").await, 1);

    app.cleanup().await;
}

#[tokio::test]
async fn contract_without_penalty_terms_still_goes_overdue() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let contract_id = app.seed_contract(10, 12).await;
    let enrollment_id = app.seed_enrollment(contract_id, 60_000, dec!(0), true).await;
    app.run_generation(date(2024, 1, 1)).await;

    let summary = app.run_accrual(date(2024, 2, 1)).await;
    assert_eq!(summary["updated"], 1);

    let invoice = app.invoice_for_enrollment(enrollment_id).await;
    assert_eq!(invoice.status, "overdue");
    assert_eq!(invoice.fine_amount_cents, 0);
    assert_eq!(invoice.interest_amount_cents, 0);
    assert_eq!(invoice.total_amount_cents, 60_000);

    app.cleanup().await;
}

#[tokio::test]
async fn invoices_not_yet_due_are_left_alone() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let contract_id = app.seed_contract(10, 12).await;
    app.seed_interest(contract_id, dec!(2), dec!(0.1)).await;
    let enrollment_id = app.seed_enrollment(contract_id, 60_000, dec!(0), true).await;
    app.run_generation(date(2024, 1, 1)).await;

    // Due date itself is not late.
    let summary = app.run_accrual(date(2024, 1, 10)).await;
    assert_eq!(summary["processed"], 0);

    let invoice = app.invoice_for_enrollment(enrollment_id).await;
    assert_eq!(invoice.status, "not_paid");

    app.cleanup().await;
}
