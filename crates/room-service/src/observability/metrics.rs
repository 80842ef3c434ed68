//! Prometheus metrics for the room service.
//!
//! All metrics use the `rc_` prefix, `_total` for counters and `_seconds` for
//! duration histograms. Labels are bounded: `operation` by store methods,
//! `message_type` by `ClientMessage` variants, `outcome` by a fixed set of
//! strings.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return its render handle.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rc_db".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set database latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Metric: `rc_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_rooms_active").set(count as f64);
}

/// Metric: `rc_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_connections_active").set(count as f64);
}

/// Metric: `rc_room_joins_total`
pub fn record_join() {
    counter!("rc_room_joins_total").increment(1);
}

/// Metric: `rc_room_leaves_total`
/// Labels: `reason` (leave, disconnect, close)
pub fn record_leave(reason: &'static str) {
    counter!("rc_room_leaves_total", "reason" => reason).increment(1);
}

/// Metric: `rc_signals_relayed_total`
pub fn record_signal_relayed() {
    counter!("rc_signals_relayed_total").increment(1);
}

/// Metric: `rc_signals_dropped_total`
pub fn record_signal_dropped() {
    counter!("rc_signals_dropped_total").increment(1);
}

/// Metric: `rc_messages_received_total`
/// Labels: `message_type`
pub fn record_message_received(message_type: &'static str) {
    counter!("rc_messages_received_total", "message_type" => message_type).increment(1);
}

/// Metric: `rc_tracker_operations_total`
/// Labels: `operation`, `outcome`
pub fn record_tracker_operation(operation: &'static str, outcome: &'static str) {
    counter!(
        "rc_tracker_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Metrics: `rc_db_query_duration_seconds`, `rc_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("rc_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rc_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
