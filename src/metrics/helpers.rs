//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use crate::notification::{DispatchResult, FailureReason, TargetKind};

use super::{
    DISPATCHES_REJECTED_TOTAL, DISPATCHES_TOTAL, DISPATCH_LATENCY, GATEWAY_CALLS_TOTAL,
    GATEWAY_CALL_FAILURES_TOTAL, GATEWAY_RETRIES_TOTAL, INVALIDATIONS_TOTAL,
    RECIPIENTS_FAILED_TOTAL, RECIPIENTS_SUCCEEDED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record an accepted dispatch request
    pub fn record_dispatch(kind: TargetKind) {
        DISPATCHES_TOTAL.with_label_values(&[kind.as_str()]).inc();
    }

    /// Record a request rejected by validation
    pub fn record_rejected(code: &str) {
        DISPATCHES_REJECTED_TOTAL.with_label_values(&[code]).inc();
    }

    /// Record totals of a finished dispatch
    pub fn record_result(result: &DispatchResult, elapsed: Duration) {
        DISPATCH_LATENCY.observe(elapsed.as_secs_f64());
        RECIPIENTS_SUCCEEDED_TOTAL.inc_by(result.total_succeeded as u64);
        for reason in result.failed().values() {
            RECIPIENTS_FAILED_TOTAL
                .with_label_values(&[reason.as_str()])
                .inc();
        }
        INVALIDATIONS_TOTAL.inc_by(result.invalidations.len() as u64);
    }
}

/// Helper struct for recording gateway metrics
pub struct GatewayMetrics;

impl GatewayMetrics {
    /// Record a gateway call attempt
    pub fn record_call(kind: TargetKind) {
        GATEWAY_CALLS_TOTAL.with_label_values(&[kind.as_str()]).inc();
    }

    /// Record a retry after a transient failure
    pub fn record_retry() {
        GATEWAY_RETRIES_TOTAL.inc();
    }

    /// Record a batch that ended without a usable response
    pub fn record_call_failure(reason: FailureReason) {
        GATEWAY_CALL_FAILURES_TOTAL
            .with_label_values(&[reason.as_str()])
            .inc();
    }
}
