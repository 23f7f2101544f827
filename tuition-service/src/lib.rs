//! Tuition Service - contract-driven installment billing as a service.
//!
//! Owns the invoice ledger and everything that mutates it: scheduled
//! installment generation, daily late-interest accrual and idempotent
//! reconciliation of payment-gateway webhook deliveries.

pub mod config;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod money;
pub mod services;
pub mod startup;
