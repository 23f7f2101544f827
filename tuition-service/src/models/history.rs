//! Append-only status-history trail. Rows are never updated or deleted; this
//! table is the sole audit source of truth for ledger transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StatusHistoryEntry {
    pub history_id: Uuid,
    pub invoice_id: Uuid,
    pub previous_status: String,
    pub new_status: String,
    /// `system:<job>` or `user:<uuid>`.
    pub changed_by: String,
    pub observation: Option<String>,
    pub changed_utc: DateTime<Utc>,
}

/// Who performed a ledger transition. Threaded explicitly through every job
/// and handler call; there is deliberately no ambient/global actor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditActor {
    System(&'static str),
    User(Uuid),
}

impl AuditActor {
    pub const SCHEDULE_GENERATOR: AuditActor = AuditActor::System("schedule-generator");
    pub const INTEREST_ACCRUAL: AuditActor = AuditActor::System("interest-accrual");
    pub const PAYMENT_GATEWAY: AuditActor = AuditActor::System("payment-gateway");
}

impl fmt::Display for AuditActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditActor::System(job) => write!(f, "system:{}", job),
            AuditActor::User(id) => write!(f, "user:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_renders_with_kind_prefix() {
        assert_eq!(
            AuditActor::INTEREST_ACCRUAL.to_string(),
            "system:interest-accrual"
        );
        let id = Uuid::new_v4();
        assert_eq!(AuditActor::User(id).to_string(), format!("user:{}", id));
    }
}
