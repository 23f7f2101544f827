//! Contract terms: payment day, interest configuration and early-discount
//! tiers. Read-only from this service's point of view; the enrollment system
//! owns these tables.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contract {
    pub contract_id: Uuid,
    pub school_id: Uuid,
    pub installments: i32,
    /// Day-of-month, 1-31. Clamped to month length when a due date is computed.
    pub payment_day: i32,
    pub created_utc: DateTime<Utc>,
}

/// Late-payment penalties. Rates carry 3-decimal precision.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InterestConfig {
    pub contract_id: Uuid,
    /// One-time fine, as a percentage of the base amount (e.g. 2.000).
    pub delay_interest_percentage: Decimal,
    /// Daily accrual rate, as a percentage of the base amount per day late.
    pub delay_interest_per_day_delayed: Decimal,
}

/// One early-payment discount tier. A contract may define several and they
/// are not required to be mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EarlyDiscountTier {
    pub contract_id: Uuid,
    pub percentage: Decimal,
    /// Minimum days paid-in-advance to qualify.
    pub days_before_deadline: i32,
}

/// Assembled view of a contract's payment terms.
#[derive(Debug, Clone)]
pub struct ContractTerms {
    pub contract: Contract,
    pub interest: Option<InterestConfig>,
    pub early_discounts: Vec<EarlyDiscountTier>,
}

/// One active enrollment as returned by the enrollment listing, carrying the
/// monthly amount and any scholarship/individual discount already granted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActiveEnrollment {
    pub student_has_level_id: Uuid,
    pub student_id: Uuid,
    pub contract_id: Uuid,
    pub school_id: Uuid,
    pub monthly_amount_cents: i64,
    pub discount_percentage: Decimal,
}
