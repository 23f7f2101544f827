//! Test helper module for tuition-service integration tests.
//!
//! Provides common setup utilities for PostgreSQL-based tests. Every test
//! runs in its own schema so the suite can run in parallel against one
//! database. Tests are skipped when `TEST_DATABASE_URL` is not set.

#![allow(dead_code)]

use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::config::Config as CoreConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use tuition_service::config::{DatabaseConfig, TuitionConfig, WebhookConfig};
use tuition_service::models::Invoice;
use tuition_service::services::Database;
use tuition_service::startup::Application;
use uuid::Uuid;

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Get the database URL for testing, if one is configured.
pub fn get_test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// Generate a unique schema name for test isolation.
fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_tuition_{}_{}", std::process::id(), counter)
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: Database,
    pub client: reqwest::Client,
    schema_name: String,
}

impl TestApp {
    /// Spawn a new test application on a random port, or `None` when no
    /// test database is configured.
    pub async fn spawn() -> Option<Self> {
        Self::spawn_with_webhook(WebhookConfig {
            max_attempts: 5,
            retry_base_seconds: 30,
        })
        .await
    }

    /// Spawn with a specific webhook retry policy.
    pub async fn spawn_with_webhook(webhook: WebhookConfig) -> Option<Self> {
        let Some(base_url) = get_test_database_url() else {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return None;
        };
        let schema_name = unique_schema_name();

        // Create schema for test isolation
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");

        pool.close().await;

        // Scope all connections to the test schema via search_path
        let separator = if base_url.contains('?') { "&" } else { "?" };
        let db_url_with_schema = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );

        let config = TuitionConfig {
            common: CoreConfig { port: 0 }, // Random port
            service_name: "tuition-service-test".to_string(),
            log_level: "warn".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: db_url_with_schema.clone(),
                max_connections: 5,
                min_connections: 1,
            },
            webhook,
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let db = Database::new(&db_url_with_schema, 5, 1)
            .await
            .expect("Failed to create test database handle");
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the HTTP server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        Some(TestApp {
            address,
            port,
            db,
            client,
            schema_name,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Insert a contract and return its id.
    pub async fn seed_contract(&self, payment_day: i32, installments: i32) -> Uuid {
        let contract_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO contracts (contract_id, school_id, installments, payment_day)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(contract_id)
        .bind(Uuid::new_v4())
        .bind(installments)
        .bind(payment_day)
        .execute(self.db.pool())
        .await
        .expect("Failed to seed contract");
        contract_id
    }

    /// Attach late-payment terms to a contract.
    pub async fn seed_interest(&self, contract_id: Uuid, fine_pct: Decimal, daily_pct: Decimal) {
        sqlx::query(
            "INSERT INTO contract_interest_configs
                 (contract_id, delay_interest_percentage, delay_interest_per_day_delayed)
             VALUES ($1, $2, $3)",
        )
        .bind(contract_id)
        .bind(fine_pct)
        .bind(daily_pct)
        .execute(self.db.pool())
        .await
        .expect("Failed to seed interest config");
    }

    /// Attach one early-payment discount tier to a contract.
    pub async fn seed_discount_tier(
        &self,
        contract_id: Uuid,
        percentage: Decimal,
        days_before_deadline: i32,
    ) {
        sqlx::query(
            "INSERT INTO contract_early_discounts (contract_id, percentage, days_before_deadline)
             VALUES ($1, $2, $3)",
        )
        .bind(contract_id)
        .bind(percentage)
        .bind(days_before_deadline)
        .execute(self.db.pool())
        .await
        .expect("Failed to seed discount tier");
    }

    /// Insert an enrollment and return its id.
    pub async fn seed_enrollment(
        &self,
        contract_id: Uuid,
        monthly_amount_cents: i64,
        discount_percentage: Decimal,
        is_active: bool,
    ) -> Uuid {
        let enrollment_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO student_has_levels
                 (student_has_level_id, student_id, contract_id, school_id,
                  monthly_amount_cents, discount_percentage, is_active)
             SELECT $1, $2, $3, c.school_id, $4, $5, $6
             FROM contracts c WHERE c.contract_id = $3",
        )
        .bind(enrollment_id)
        .bind(Uuid::new_v4())
        .bind(contract_id)
        .bind(monthly_amount_cents)
        .bind(discount_percentage)
        .bind(is_active)
        .execute(self.db.pool())
        .await
        .expect("Failed to seed enrollment");
        enrollment_id
    }

    /// Run the schedule generator through the route and return its summary.
    pub async fn run_generation(&self, reference: NaiveDate) -> serde_json::Value {
        let response = self
            .client
            .post(self.url("/jobs/generate-payments"))
            .json(&serde_json::json!({ "reference": reference }))
            .send()
            .await
            .expect("Failed to call generate-payments");
        assert!(response.status().is_success());
        response.json().await.expect("Invalid generation summary")
    }

    /// Run the accrual job through the route and return its summary.
    pub async fn run_accrual(&self, as_of: NaiveDate) -> serde_json::Value {
        let response = self
            .client
            .post(self.url("/jobs/apply-interest"))
            .json(&serde_json::json!({ "as_of": as_of }))
            .send()
            .await
            .expect("Failed to call apply-interest");
        assert!(response.status().is_success());
        response.json().await.expect("Invalid accrual summary")
    }

    /// The single invoice billed against an enrollment, fresh from the db.
    pub async fn invoice_for_enrollment(&self, enrollment_id: Uuid) -> Invoice {
        let invoices = sqlx::query_as::<_, Invoice>(
            "SELECT invoice_id, student_id, contract_id, student_has_level_id, invoice_type,
                    month, year, due_date, base_amount_cents, discount_amount_cents,
                    fine_amount_cents, interest_amount_cents, total_amount_cents, status,
                    installments, installment_number, paid_utc, last_interest_applied_on,
                    gateway_charge_id, metadata, created_utc, updated_utc
             FROM invoices WHERE student_has_level_id = $1",
        )
        .bind(enrollment_id)
        .fetch_all(self.db.pool())
        .await
        .expect("Failed to load invoices");
        assert_eq!(invoices.len(), 1, "expected exactly one invoice");
        invoices.into_iter().next().unwrap()
    }

    /// Insert a webhook event row in a given state, aged by `age_seconds`,
    /// as if a worker had claimed it and then crashed.
    pub async fn seed_webhook_event(
        &self,
        provider: &str,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        status: &str,
        age_seconds: i64,
    ) {
        sqlx::query(
            "INSERT INTO webhook_events
                 (webhook_event_id, provider, provider_event_id, event_type, payload,
                  status, attempts, updated_utc)
             VALUES ($1, $2, $3, $4, $5, $6, 1, NOW() - ($7 * INTERVAL '1 second'))",
        )
        .bind(Uuid::new_v4())
        .bind(provider)
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .bind(status)
        .bind(age_seconds)
        .execute(self.db.pool())
        .await
        .expect("Failed to seed webhook event");
    }

    /// Count of history rows recording a transition into `new_status`.
    pub async fn history_count(&self, invoice_id: Uuid, new_status: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payment_status_history
             WHERE invoice_id = $1 AND new_status = $2",
        )
        .bind(invoice_id)
        .bind(new_status)
        .fetch_one(self.db.pool())
        .await
        .expect("Failed to count history rows")
    }

    /// Cleanup test resources (schema).
    pub async fn cleanup(&self) {
        let Some(base_url) = get_test_database_url() else {
            return;
        };
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&base_url)
            .await
            .ok();

        if let Some(pool) = pool {
            let _ = sqlx::query(&format!(
                "DROP SCHEMA IF EXISTS {} CASCADE",
                self.schema_name
            ))
            .execute(&pool)
            .await;
            pool.close().await;
        }
    }
}
