//! Counters for teardown and failure events, recorded through the `metrics`
//! facade when the `metrics` feature is enabled.

use crate::token::CancelReason;

/// Count one producer cancellation, labelled by reason.
pub(crate) fn record_cancellation(_reason: &CancelReason) {
    #[cfg(feature = "metrics")]
    metrics::counter!("sluice_cancellations_total", "reason" => _reason.label()).increment(1);
}

/// Count one fail-fast teardown inside a coordinator.
pub(crate) fn record_fail_fast(_operator: &'static str) {
    #[cfg(feature = "metrics")]
    metrics::counter!("sluice_fail_fast_total", "operator" => _operator).increment(1);
}
