//! Prometheus metrics for the coin engine

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Total authentication attempts
    pub static ref AUTH_TOTAL: CounterVec = register_counter_vec!(
        "coin_engine_auth_total",
        "Total authentication attempts",
        &["status"]
    )
    .unwrap();

    /// Total coin transfers
    pub static ref TRANSFERS_TOTAL: CounterVec = register_counter_vec!(
        "coin_engine_transfers_total",
        "Total coin transfer attempts",
        &["status"]
    )
    .unwrap();

    /// Total merch purchases
    pub static ref PURCHASES_TOTAL: CounterVec = register_counter_vec!(
        "coin_engine_purchases_total",
        "Total merch purchase attempts",
        &["status"]
    )
    .unwrap();

    /// Ledger mutation duration
    pub static ref LEDGER_OP_DURATION: HistogramVec = register_histogram_vec!(
        "coin_engine_ledger_op_duration_seconds",
        "Ledger mutation duration in seconds",
        &["operation"]
    )
    .unwrap();
}

pub fn metrics_handler() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families)
}
