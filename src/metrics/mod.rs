//! Prometheus metrics for the dispatch core.
//!
//! - Dispatch metrics (requests by target kind, rejections, latency)
//! - Gateway metrics (calls by target kind, retries)
//! - Recipient metrics (succeeded, failed by reason, invalidations)

mod helpers;

pub use helpers::{encode_metrics, DispatchMetrics, GatewayMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "push";

lazy_static! {
    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Dispatch requests accepted, by target kind
    pub static ref DISPATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatches_total", METRIC_PREFIX),
        "Total dispatch requests processed",
        &["target"]
    ).unwrap();

    /// Dispatch requests rejected before any gateway call, by error code
    pub static ref DISPATCHES_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatches_rejected_total", METRIC_PREFIX),
        "Total dispatch requests rejected by validation",
        &["code"]
    ).unwrap();

    /// Time from dispatch start until every batch has a terminal outcome
    pub static ref DISPATCH_LATENCY: Histogram = register_histogram!(
        format!("{}_dispatch_latency_seconds", METRIC_PREFIX),
        "Dispatch latency in seconds",
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // ============================================================================
    // Gateway Metrics
    // ============================================================================

    /// Gateway calls issued, by target kind
    pub static ref GATEWAY_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_gateway_calls_total", METRIC_PREFIX),
        "Total gateway calls issued",
        &["target"]
    ).unwrap();

    /// Gateway call retries after transient failures
    pub static ref GATEWAY_RETRIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_gateway_retries_total", METRIC_PREFIX),
        "Total gateway call retries"
    ).unwrap();

    /// Batches that gave up without a gateway response
    pub static ref GATEWAY_CALL_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_gateway_call_failures_total", METRIC_PREFIX),
        "Total batches that failed at call level",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Recipient Metrics
    // ============================================================================

    /// Recipients accepted by the gateway
    pub static ref RECIPIENTS_SUCCEEDED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_recipients_succeeded_total", METRIC_PREFIX),
        "Total recipients accepted by the gateway"
    ).unwrap();

    /// Recipients that failed, by reason
    pub static ref RECIPIENTS_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_recipients_failed_total", METRIC_PREFIX),
        "Total recipients that failed delivery",
        &["reason"]
    ).unwrap();

    /// Tokens reported to the resolver as dead
    pub static ref INVALIDATIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_invalidations_total", METRIC_PREFIX),
        "Total device tokens invalidated"
    ).unwrap();
}
