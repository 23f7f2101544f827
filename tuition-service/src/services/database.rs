//! Database service for tuition-service.

use crate::models::{
    ActiveEnrollment, AuditActor, Contract, ContractTerms, CreateInvoice, EarlyDiscountTier,
    InterestConfig, Invoice, InvoiceStatus, ListInvoicesFilter, StatusHistoryEntry, WebhookDelivery,
    WebhookEvent,
};
use crate::services::metrics::{record_transition, DB_QUERY_DURATION};
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, student_id, contract_id, student_has_level_id, invoice_type, month, year, due_date, base_amount_cents, discount_amount_cents, fine_amount_cents, interest_amount_cents, total_amount_cents, status, installments, installment_number, paid_utc, last_interest_applied_on, gateway_charge_id, metadata, created_utc, updated_utc";

const WEBHOOK_COLUMNS: &str = "webhook_event_id, provider, provider_event_id, event_type, payload, status, attempts, error, next_retry_utc, processed_utc, created_utc, updated_utc";

/// A `processing` claim older than this is treated as abandoned by a crashed
/// worker and may be re-claimed; the crashed attempt burned its slot, the
/// reclaim counts a new one.
const STALE_CLAIM_SECONDS: i64 = 300;

/// Outcome of an invoice insert that races the partial-unique constraint.
#[derive(Debug)]
pub enum InsertOutcome {
    Created(Box<Invoice>),
    /// Another worker (or a previous run) already holds the period slot.
    AlreadyExists,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "tuition-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Contract terms (read-only)
    // =========================================================================

    /// Load a contract's payment terms: payment day, interest configuration
    /// and early-discount tiers.
    #[instrument(skip(self), fields(contract_id = %contract_id))]
    pub async fn get_contract_terms(
        &self,
        contract_id: Uuid,
    ) -> Result<Option<ContractTerms>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_contract_terms"])
            .start_timer();

        let contract = sqlx::query_as::<_, Contract>(
            r#"
            SELECT contract_id, school_id, installments, payment_day, created_utc
            FROM contracts
            WHERE contract_id = $1
            "#,
        )
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get contract: {}", e)))?;

        let Some(contract) = contract else {
            timer.observe_duration();
            return Ok(None);
        };

        let interest = sqlx::query_as::<_, InterestConfig>(
            r#"
            SELECT contract_id, delay_interest_percentage, delay_interest_per_day_delayed
            FROM contract_interest_configs
            WHERE contract_id = $1
            "#,
        )
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get interest config: {}", e))
        })?;

        let early_discounts = sqlx::query_as::<_, EarlyDiscountTier>(
            r#"
            SELECT contract_id, percentage, days_before_deadline
            FROM contract_early_discounts
            WHERE contract_id = $1
            ORDER BY days_before_deadline
            "#,
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get discount tiers: {}", e))
        })?;

        timer.observe_duration();

        Ok(Some(ContractTerms {
            contract,
            interest,
            early_discounts,
        }))
    }

    /// List active enrollments, optionally scoped to one school.
    #[instrument(skip(self))]
    pub async fn list_active_enrollments(
        &self,
        school_id: Option<Uuid>,
    ) -> Result<Vec<ActiveEnrollment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_enrollments"])
            .start_timer();

        let enrollments = sqlx::query_as::<_, ActiveEnrollment>(
            r#"
            SELECT student_has_level_id, student_id, contract_id, school_id, monthly_amount_cents, discount_percentage
            FROM student_has_levels
            WHERE is_active = TRUE
              AND ($1::uuid IS NULL OR school_id = $1)
            ORDER BY student_has_level_id
            "#,
        )
        .bind(school_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list enrollments: {}", e))
        })?;

        timer.observe_duration();

        Ok(enrollments)
    }

    // =========================================================================
    // Invoice Ledger
    // =========================================================================

    /// Insert a new invoice with status `not_paid`.
    ///
    /// Losing the race on the enrollment/period unique index is reported as
    /// `AlreadyExists`, never as an error: the generator may run concurrently
    /// or be retried after partial failure.
    #[instrument(skip(self, input), fields(student_id = %input.student_id))]
    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<InsertOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let invoice_id = Uuid::new_v4();
        let result = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (invoice_id, student_id, contract_id, student_has_level_id, invoice_type, month, year, due_date, base_amount_cents, total_amount_cents, installments, installment_number, gateway_charge_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9, $10, $11, $12, $13)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_id)
        .bind(input.student_id)
        .bind(input.contract_id)
        .bind(input.student_has_level_id)
        .bind(input.invoice_type.as_str())
        .bind(input.month)
        .bind(input.year)
        .bind(input.due_date)
        .bind(input.base_amount_cents)
        .bind(input.installments)
        .bind(input.installment_number)
        .bind(&input.gateway_charge_id)
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(invoice) => {
                info!(invoice_id = %invoice.invoice_id, "Invoice created");
                Ok(InsertOutcome::Created(Box::new(invoice)))
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Race with another generator run; the slot is taken.
                Ok(InsertOutcome::AlreadyExists)
            }
            Err(e) => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to create invoice: {}",
                e
            ))),
        }
    }

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Resolve the invoice a gateway payment refers to: by explicit invoice id
    /// when the payload metadata carries one, otherwise by the gateway charge
    /// id the invoice was registered with.
    #[instrument(skip(self))]
    pub async fn find_invoice_for_payment(
        &self,
        invoice_id: Option<Uuid>,
        gateway_charge_id: Option<&str>,
    ) -> Result<Option<Invoice>, AppError> {
        if let Some(id) = invoice_id {
            return self.get_invoice(id).await;
        }
        let Some(charge_id) = gateway_charge_id else {
            return Ok(None);
        };

        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_invoice_by_charge"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE gateway_charge_id = $1"
        ))
        .bind(charge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find invoice by charge: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// List invoices.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE ($1::uuid IS NULL OR student_has_level_id = $1)
              AND ($2::uuid IS NULL OR student_id = $2)
              AND ($3::varchar IS NULL OR status = $3)
              AND ($4::int IS NULL OR month = $4)
              AND ($5::int IS NULL OR year = $5)
              AND ($6::uuid IS NULL OR invoice_id > $6)
            ORDER BY invoice_id
            LIMIT $7
            "#
        ))
        .bind(filter.student_has_level_id)
        .bind(filter.student_id)
        .bind(&status_str)
        .bind(filter.month)
        .bind(filter.year)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Get the status-history trail for an invoice, oldest first.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice_history(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<StatusHistoryEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice_history"])
            .start_timer();

        let entries = sqlx::query_as::<_, StatusHistoryEntry>(
            r#"
            SELECT history_id, invoice_id, previous_status, new_status, changed_by, observation, changed_utc
            FROM payment_status_history
            WHERE invoice_id = $1
            ORDER BY changed_utc, history_id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get history: {}", e)))?;

        timer.observe_duration();

        Ok(entries)
    }

    /// Find unpaid invoices whose due date is strictly before `as_of`.
    #[instrument(skip(self))]
    pub async fn find_overdue_unpaid(&self, as_of: NaiveDate) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_overdue_unpaid"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE status IN ('not_paid', 'overdue')
              AND due_date < $1
            ORDER BY invoice_id
            "#
        ))
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find overdue invoices: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Perform one audited status transition.
    ///
    /// Load current state, validate against the transition table, write the
    /// new state and append the history row, all in one transaction so the
    /// ledger row and its trail are never observed split. An illegal
    /// transition raises a conflict naming both states and writes nothing.
    ///
    /// `paid_utc` applies when the target state is `paid`; the reversal back
    /// to `not_paid` clears it. `discount_cents`, when given with a `paid`
    /// target, replaces the discount and recomputes the total.
    #[instrument(skip(self, actor, observation), fields(invoice_id = %invoice_id, new_status = new_status.as_str()))]
    pub async fn transition_invoice(
        &self,
        invoice_id: Uuid,
        new_status: InvoiceStatus,
        actor: AuditActor,
        observation: Option<&str>,
        paid_utc: Option<DateTime<Utc>>,
        discount_cents: Option<i64>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transition_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1 FOR UPDATE"
        ))
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;

        let current = invoice.status();
        if !current.can_transition_to(new_status) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Illegal status transition from {} to {} for invoice {}",
                current.as_str(),
                new_status.as_str(),
                invoice_id
            )));
        }

        let discount = match discount_cents {
            Some(d) if new_status == InvoiceStatus::Paid => d,
            _ => invoice.discount_amount_cents,
        };
        let total = invoice.base_amount_cents - discount
            + invoice.fine_amount_cents
            + invoice.interest_amount_cents;
        if total < 0 {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Transition would leave invoice {} with negative total {}",
                invoice_id,
                total
            )));
        }

        let paid_value = match new_status {
            InvoiceStatus::Paid => paid_utc.or_else(|| Some(Utc::now())),
            _ => None,
        };

        let updated = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = $2, paid_utc = $3, discount_amount_cents = $4, total_amount_cents = $5, updated_utc = NOW()
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_id)
        .bind(new_status.as_str())
        .bind(paid_value)
        .bind(discount)
        .bind(total)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO payment_status_history (history_id, invoice_id, previous_status, new_status, changed_by, observation)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(current.as_str())
        .bind(new_status.as_str())
        .bind(actor.to_string())
        .bind(observation)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to append history: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transition: {}", e))
        })?;

        timer.observe_duration();
        record_transition(current.as_str(), new_status.as_str());
        info!(
            invoice_id = %invoice_id,
            from = current.as_str(),
            to = new_status.as_str(),
            actor = %actor,
            "Invoice status transitioned"
        );

        Ok(updated)
    }

    /// Apply one day's accrual result to an invoice.
    ///
    /// The fine/interest values are recomputed by the caller from the base
    /// amount, so re-applying the same day's figures is a no-op in effect.
    /// Updates all monetary fields, the `overdue` status (with a history row
    /// the first time) and the watermark in a single transaction. Returns
    /// `false` when the invoice is no longer accruable (paid or terminal),
    /// which is not an error: the sweep ran from a snapshot.
    #[instrument(skip(self, actor), fields(invoice_id = %invoice_id))]
    pub async fn apply_accrual(
        &self,
        invoice_id: Uuid,
        fine_cents: i64,
        interest_cents: i64,
        as_of: NaiveDate,
        actor: AuditActor,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_accrual"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1 FOR UPDATE"
        ))
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;

        let current = invoice.status();
        if !matches!(current, InvoiceStatus::NotPaid | InvoiceStatus::Overdue) {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(false);
        }

        let total = invoice.base_amount_cents - invoice.discount_amount_cents
            + fine_cents
            + interest_cents;
        if total < 0 {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Accrual would leave invoice {} with negative total {}",
                invoice_id,
                total
            )));
        }

        sqlx::query(
            r#"
            UPDATE invoices
            SET fine_amount_cents = $2, interest_amount_cents = $3, total_amount_cents = $4,
                status = 'overdue', last_interest_applied_on = $5, updated_utc = NOW()
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(fine_cents)
        .bind(interest_cents)
        .bind(total)
        .bind(as_of)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to apply accrual: {}", e)))?;

        if current != InvoiceStatus::Overdue {
            sqlx::query(
                r#"
                INSERT INTO payment_status_history (history_id, invoice_id, previous_status, new_status, changed_by, observation)
                VALUES ($1, $2, $3, 'overdue', $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(current.as_str())
            .bind(actor.to_string())
            .bind(format!("Late interest applied as of {}", as_of))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to append history: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit accrual: {}", e))
        })?;

        timer.observe_duration();
        if current != InvoiceStatus::Overdue {
            record_transition(current.as_str(), InvoiceStatus::Overdue.as_str());
        }

        Ok(true)
    }

    // =========================================================================
    // Webhook event store
    // =========================================================================

    /// Record a delivery, keyed by `(provider, event_id)`.
    ///
    /// The insert tolerates losing the race: when the row already exists (any
    /// status) the existing row is returned untouched. Never pre-check then
    /// insert; the unique constraint is the arbiter.
    #[instrument(skip(self, delivery), fields(provider = %delivery.provider, event_id = %delivery.event_id))]
    pub async fn upsert_webhook_event(
        &self,
        delivery: &WebhookDelivery,
    ) -> Result<WebhookEvent, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_webhook_event"])
            .start_timer();

        let inserted = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            INSERT INTO webhook_events (webhook_event_id, provider, provider_event_id, event_type, payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider, provider_event_id) DO NOTHING
            RETURNING {WEBHOOK_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&delivery.provider)
        .bind(&delivery.event_id)
        .bind(&delivery.event_type)
        .bind(&delivery.payload)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upsert webhook event: {}", e))
        })?;

        let event = match inserted {
            Some(event) => event,
            None => self
                .get_webhook_event(&delivery.provider, &delivery.event_id)
                .await?
                .ok_or_else(|| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Webhook event vanished after conflict"
                    ))
                })?,
        };

        timer.observe_duration();

        Ok(event)
    }

    /// Get a webhook event by its provider-assigned identity.
    #[instrument(skip(self))]
    pub async fn get_webhook_event(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<Option<WebhookEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_webhook_event"])
            .start_timer();

        let event = sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhook_events WHERE provider = $1 AND provider_event_id = $2"
        ))
        .bind(provider)
        .bind(provider_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get webhook event: {}", e))
        })?;

        timer.observe_duration();

        Ok(event)
    }

    /// Claim an event for processing with a compare-and-set.
    ///
    /// `pending` events, `failed` events whose backoff window has elapsed
    /// (and that are still under the attempt ceiling), and `processing` rows
    /// abandoned by a crashed worker for longer than the staleness window can
    /// be claimed; exactly one of two concurrent workers gets the row. `None`
    /// means the claim was lost; the caller inspects the row to decide
    /// duplicate vs busy vs exhausted.
    #[instrument(skip(self))]
    pub async fn claim_webhook_event(
        &self,
        provider: &str,
        provider_event_id: &str,
        max_attempts: i32,
    ) -> Result<Option<WebhookEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_webhook_event"])
            .start_timer();

        let event = sqlx::query_as::<_, WebhookEvent>(&format!(
            r#"
            UPDATE webhook_events
            SET status = 'processing', attempts = attempts + 1, updated_utc = NOW()
            WHERE provider = $1 AND provider_event_id = $2
              AND (
                status = 'pending'
                OR (status = 'failed'
                    AND attempts < $3
                    AND (next_retry_utc IS NULL OR next_retry_utc <= NOW()))
                OR (status = 'processing'
                    AND updated_utc < NOW() - ($4 * INTERVAL '1 second'))
              )
            RETURNING {WEBHOOK_COLUMNS}
            "#
        ))
        .bind(provider)
        .bind(provider_event_id)
        .bind(max_attempts)
        .bind(STALE_CLAIM_SECONDS)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to claim webhook event: {}", e))
        })?;

        timer.observe_duration();

        Ok(event)
    }

    /// Mark a claimed event completed.
    #[instrument(skip(self), fields(webhook_event_id = %webhook_event_id))]
    pub async fn complete_webhook_event(&self, webhook_event_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_webhook_event"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'completed', processed_utc = NOW(), error = NULL, next_retry_utc = NULL, updated_utc = NOW()
            WHERE webhook_event_id = $1
            "#,
        )
        .bind(webhook_event_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to complete webhook event: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    /// Mark a claimed event failed, recording the error and the next retry
    /// window. The event is never deleted; past the attempt ceiling it stays
    /// `failed` for operational follow-up.
    #[instrument(skip(self, error), fields(webhook_event_id = %webhook_event_id))]
    pub async fn fail_webhook_event(
        &self,
        webhook_event_id: Uuid,
        error: &str,
        next_retry_utc: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_webhook_event"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'failed', error = $2, next_retry_utc = $3, updated_utc = NOW()
            WHERE webhook_event_id = $1
            "#,
        )
        .bind(webhook_event_id)
        .bind(error)
        .bind(next_retry_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to fail webhook event: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }
}
