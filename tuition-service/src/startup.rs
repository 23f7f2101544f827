//! Application startup and lifecycle management.

use crate::config::TuitionConfig;
use crate::handlers::{
    cancel_invoice, get_invoice, get_invoice_history, get_webhook_event, list_invoices,
    receive_webhook, renegotiate_invoice, run_apply_interest, run_generate_payments,
};
use crate::services::{get_metrics, init_metrics, Database};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: TuitionConfig,
    pub db: Arc<Database>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "tuition-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "tuition-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: TuitionConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: TuitionConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: TuitionConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let state = AppState {
            config: config.clone(),
            db: Arc::new(db),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Tuition service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .route("/webhooks/:provider", post(receive_webhook))
            .route(
                "/webhooks/:provider/events/:event_id",
                get(get_webhook_event),
            )
            .route("/jobs/generate-payments", post(run_generate_payments))
            .route("/jobs/apply-interest", post(run_apply_interest))
            .route("/invoices", get(list_invoices))
            .route("/invoices/:invoice_id", get(get_invoice))
            .route("/invoices/:invoice_id/history", get(get_invoice_history))
            .route("/invoices/:invoice_id/cancel", post(cancel_invoice))
            .route(
                "/invoices/:invoice_id/renegotiate",
                post(renegotiate_invoice),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = Self::router(self.state);
        tracing::info!(port = self.port, "Starting HTTP server");
        axum::serve(self.listener, router).await
    }
}
