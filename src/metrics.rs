//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Entitlement Metrics
    pub static ref ACCESS_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("reelpass_access_decisions_total", "Total number of access decisions"),
        &["target", "reason"]
    ).expect("metric can be created");
    pub static ref DEVICE_REGISTRATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("reelpass_device_registrations_total", "Total number of device session registrations"),
        &["outcome"]
    ).expect("metric can be created");

    // Ledger Metrics
    pub static ref LEDGER_OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("reelpass_ledger_operations_total", "Total number of wallet ledger operations"),
        &["operation", "outcome"]
    ).expect("metric can be created");
    pub static ref LEDGER_UNRECONCILED_WALLETS: IntGauge = IntGauge::new(
        "reelpass_ledger_unreconciled_wallets",
        "Wallets whose balance disagreed with the ledger at the last audit"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("reelpass_errors_total", "Total number of error responses"),
        &["code"]
    ).expect("metric can be created");
}

/// Record the outcome of a ledger operation.
pub fn record_ledger_outcome<T>(operation: &str, result: &Result<T, crate::error::AppError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(error) => error.code(),
    };
    LEDGER_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(ACCESS_DECISIONS_TOTAL.clone()))
        .expect("ACCESS_DECISIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DEVICE_REGISTRATIONS_TOTAL.clone()))
        .expect("DEVICE_REGISTRATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(LEDGER_OPERATIONS_TOTAL.clone()))
        .expect("LEDGER_OPERATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(LEDGER_UNRECONCILED_WALLETS.clone()))
        .expect("LEDGER_UNRECONCILED_WALLETS can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
