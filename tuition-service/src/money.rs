//! Money and schedule primitives.
//!
//! Pure and deterministic, no I/O. Monetary amounts are integer minor units;
//! rates are 3-decimal percentages. Rounding is round-half-up, applied once
//! per formula.

use crate::models::{EarlyDiscountTier, InterestConfig};
use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Round-half-up `amount * percentage / 100` to whole minor units.
///
/// Saturates at the `i64` bounds rather than wrapping or zeroing: a clamped
/// amount trips the non-negative-total checks downstream, a silent zero
/// would not.
pub fn apply_percentage(amount_cents: i64, percentage: Decimal) -> i64 {
    let amount = Decimal::from(amount_cents) * percentage / Decimal::from(100);
    let rounded = amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    match rounded.to_i64() {
        Some(v) => v,
        None if rounded.is_sign_negative() => i64::MIN,
        None => i64::MAX,
    }
}

/// Due date for a billing period: the contract's payment day clamped to the
/// last valid day of the target month (day 31 in February becomes Feb 28/29).
pub fn compute_due_date(month: u32, year: i32, payment_day: u32) -> NaiveDate {
    let day = payment_day.min(days_in_month(month, year));
    // Clamped day is always valid for the month.
    NaiveDate::from_ymd_opt(year, month, day).expect("clamped day within month")
}

fn days_in_month(month: u32, year: i32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid month");
    next.signed_duration_since(first).num_days() as u32
}

/// Pick the early-payment discount for a payment made `days_early` days
/// before the due date.
///
/// Among tiers whose threshold is met, the one with the maximum percentage
/// wins; ties break to the largest `days_before_deadline`. No discount when
/// the payment is not actually early or no tier qualifies.
pub fn select_early_discount(
    tiers: &[EarlyDiscountTier],
    days_early: i64,
) -> Option<&EarlyDiscountTier> {
    if days_early <= 0 {
        return None;
    }
    tiers
        .iter()
        .filter(|t| i64::from(t.days_before_deadline) <= days_early)
        .max_by_key(|t| (t.percentage, t.days_before_deadline))
}

/// Late-payment penalties for an invoice `days_late` days past due.
///
/// The fine is a one-time percentage of the base amount. Interest is the
/// daily rate times `days_late`, always recomputed from the original base
/// amount, never from previously applied interest, so re-running with an
/// updated `days_late` is idempotent and monotonic.
pub fn accrue_interest(
    config: &InterestConfig,
    base_amount_cents: i64,
    days_late: i64,
) -> (i64, i64) {
    if days_late <= 0 {
        return (0, 0);
    }
    let fine = apply_percentage(base_amount_cents, config.delay_interest_percentage);
    let interest = apply_percentage(
        base_amount_cents,
        config.delay_interest_per_day_delayed * Decimal::from(days_late),
    );
    (fine, interest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn tier(percentage: Decimal, days_before_deadline: i32) -> EarlyDiscountTier {
        EarlyDiscountTier {
            contract_id: Uuid::nil(),
            percentage,
            days_before_deadline,
        }
    }

    fn config(fine_pct: Decimal, daily_pct: Decimal) -> InterestConfig {
        InterestConfig {
            contract_id: Uuid::nil(),
            delay_interest_percentage: fine_pct,
            delay_interest_per_day_delayed: daily_pct,
        }
    }

    #[test]
    fn due_date_clamps_to_february() {
        assert_eq!(
            compute_due_date(2, 2024, 31),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(
            compute_due_date(2, 2025, 31),
            NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()
        );
    }

    #[test]
    fn due_date_clamps_thirty_day_months() {
        assert_eq!(
            compute_due_date(4, 2024, 31),
            NaiveDate::from_ymd_opt(2024, 4, 30).unwrap()
        );
        assert_eq!(
            compute_due_date(12, 2024, 31),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
        );
    }

    #[test]
    fn due_date_keeps_valid_days() {
        assert_eq!(
            compute_due_date(2, 2024, 5),
            NaiveDate::from_ymd_opt(2024, 2, 5).unwrap()
        );
    }

    #[test]
    fn discount_picks_maximum_qualifying_percentage() {
        // 6 days early qualifies the 10%/5d and 15%/3d tiers; 15% wins even
        // though 5d is the tighter threshold.
        let tiers = vec![tier(dec!(10), 5), tier(dec!(15), 3), tier(dec!(5), 10)];
        let selected = select_early_discount(&tiers, 6).unwrap();
        assert_eq!(selected.percentage, dec!(15));
    }

    #[test]
    fn discount_tie_breaks_to_larger_threshold() {
        let tiers = vec![tier(dec!(10), 3), tier(dec!(10), 7)];
        let selected = select_early_discount(&tiers, 8).unwrap();
        assert_eq!(selected.days_before_deadline, 7);
    }

    #[test]
    fn no_discount_when_not_early() {
        let tiers = vec![tier(dec!(10), 0)];
        assert!(select_early_discount(&tiers, 0).is_none());
        assert!(select_early_discount(&tiers, -3).is_none());
    }

    #[test]
    fn no_discount_when_no_tier_qualifies() {
        let tiers = vec![tier(dec!(10), 10)];
        assert!(select_early_discount(&tiers, 9).is_none());
    }

    #[test]
    fn accrual_is_zero_when_not_late() {
        let cfg = config(dec!(2), dec!(0.1));
        assert_eq!(accrue_interest(&cfg, 100_000, 0), (0, 0));
        assert_eq!(accrue_interest(&cfg, 100_000, -1), (0, 0));
    }

    #[test]
    fn accrual_computes_fine_once_and_interest_per_day() {
        // R$1000.00 base, 2% fine, 0.1%/day, 10 days late.
        let cfg = config(dec!(2), dec!(0.1));
        let (fine, interest) = accrue_interest(&cfg, 100_000, 10);
        assert_eq!(fine, 2_000);
        assert_eq!(interest, 1_000);
    }

    #[test]
    fn accrual_is_idempotent_for_same_days_late() {
        let cfg = config(dec!(2.5), dec!(0.033));
        let first = accrue_interest(&cfg, 123_457, 17);
        let second = accrue_interest(&cfg, 123_457, 17);
        assert_eq!(first, second);
    }

    #[test]
    fn interest_is_monotonic_in_days_late() {
        let cfg = config(dec!(2), dec!(0.033));
        let mut previous = 0;
        for days in 1..=120 {
            let (_, interest) = accrue_interest(&cfg, 98_765, days);
            assert!(interest >= previous, "interest regressed at day {}", days);
            previous = interest;
        }
    }

    #[test]
    fn rounding_is_half_up_applied_once() {
        // 0.005% of 100.00 = 0.5 cents, rounds up to 1.
        assert_eq!(apply_percentage(10_000, dec!(0.005)), 1);
        // 0.004% of 100.00 = 0.4 cents, rounds down to 0.
        assert_eq!(apply_percentage(10_000, dec!(0.004)), 0);
        // The daily formula multiplies before the single rounding: 3 days at
        // 0.015%/day of 100.00 is 4.5 cents -> 5, not 3 * round(1.5) = 6.
        let cfg = config(dec!(0), dec!(0.015));
        let (_, interest) = accrue_interest(&cfg, 10_000, 3);
        assert_eq!(interest, 5);
    }

    #[test]
    fn percentage_saturates_instead_of_zeroing() {
        assert_eq!(apply_percentage(i64::MAX, dec!(200)), i64::MAX);
        assert_eq!(apply_percentage(i64::MIN, dec!(200)), i64::MIN);
    }
}
