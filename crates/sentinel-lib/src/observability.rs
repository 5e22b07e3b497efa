//! Observability infrastructure for metric sentinel
//!
//! Provides:
//! - Prometheus metrics (cycle latency, anomalies, emitted/suppressed alerts, failures)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

use crate::anomaly::{ThrottleDecision, UnevaluableReason};

/// Histogram buckets for cycle latency (in seconds); cycles wait on the
/// warehouse and the chat API, so the range is wide
const CYCLE_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SentinelMetricsInner> = OnceLock::new();

struct SentinelMetricsInner {
    cycle_latency_seconds: Histogram,
    cycles_total: IntCounter,
    metrics_configured: IntGauge,
    anomalies_detected: IntCounterVec,
    alerts_emitted: IntCounterVec,
    alerts_suppressed: IntCounterVec,
    evaluations_skipped: IntCounterVec,
    delivery_failures: IntCounterVec,
    source_failures: IntCounterVec,
}

impl SentinelMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "metric_sentinel_cycle_latency_seconds",
                "Time spent evaluating all configured metrics in one cycle",
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            cycles_total: register_int_counter!(
                "metric_sentinel_cycles_total",
                "Total number of evaluation cycles run"
            )
            .expect("Failed to register cycles_total"),

            metrics_configured: register_int_gauge!(
                "metric_sentinel_metrics_configured",
                "Number of metrics evaluated per cycle"
            )
            .expect("Failed to register metrics_configured"),

            anomalies_detected: register_int_counter_vec!(
                "metric_sentinel_anomalies_detected_total",
                "Anomalies detected, before throttling",
                &["metric"]
            )
            .expect("Failed to register anomalies_detected"),

            alerts_emitted: register_int_counter_vec!(
                "metric_sentinel_alerts_emitted_total",
                "Alerts delivered and recorded by the throttle",
                &["metric"]
            )
            .expect("Failed to register alerts_emitted"),

            alerts_suppressed: register_int_counter_vec!(
                "metric_sentinel_alerts_suppressed_total",
                "Anomalies not emitted because of the daily cap or cooldown",
                &["metric", "reason"]
            )
            .expect("Failed to register alerts_suppressed"),

            evaluations_skipped: register_int_counter_vec!(
                "metric_sentinel_evaluations_skipped_total",
                "Evaluations that could not be made (missing or degenerate data)",
                &["metric", "reason"]
            )
            .expect("Failed to register evaluations_skipped"),

            delivery_failures: register_int_counter_vec!(
                "metric_sentinel_delivery_failures_total",
                "Failed notification deliveries",
                &["metric"]
            )
            .expect("Failed to register delivery_failures"),

            source_failures: register_int_counter_vec!(
                "metric_sentinel_source_failures_total",
                "Failed series retrievals",
                &["metric"]
            )
            .expect("Failed to register source_failures"),
        }
    }
}

/// Sentinel metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SentinelMetrics {
    _private: (),
}

impl Default for SentinelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SentinelMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SentinelMetricsInner {
        GLOBAL_METRICS.get_or_init(SentinelMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
        self.inner().cycles_total.inc();
    }

    pub fn set_metrics_configured(&self, count: i64) {
        self.inner().metrics_configured.set(count);
    }

    pub fn inc_anomalies_detected(&self, metric: &str) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[metric])
            .inc();
    }

    pub fn inc_alerts_emitted(&self, metric: &str) {
        self.inner().alerts_emitted.with_label_values(&[metric]).inc();
    }

    pub fn inc_alerts_suppressed(&self, metric: &str, reason: &str) {
        self.inner()
            .alerts_suppressed
            .with_label_values(&[metric, reason])
            .inc();
    }

    pub fn inc_evaluations_skipped(&self, metric: &str, reason: &str) {
        self.inner()
            .evaluations_skipped
            .with_label_values(&[metric, reason])
            .inc();
    }

    pub fn inc_delivery_failures(&self, metric: &str) {
        self.inner()
            .delivery_failures
            .with_label_values(&[metric])
            .inc();
    }

    pub fn inc_source_failures(&self, metric: &str) {
        self.inner()
            .source_failures
            .with_label_values(&[metric])
            .inc();
    }

    pub fn alerts_emitted(&self, metric: &str) -> u64 {
        self.inner().alerts_emitted.with_label_values(&[metric]).get()
    }

    pub fn alerts_suppressed(&self, metric: &str, reason: &str) -> u64 {
        self.inner()
            .alerts_suppressed
            .with_label_values(&[metric, reason])
            .get()
    }
}

/// Structured logger for sentinel events
///
/// Every suppressed anomaly and failed delivery is logged so operators can
/// tell "no anomalies" apart from "anomalies suppressed".
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, metrics: usize, destinations: usize) {
        info!(
            event = "sentinel_started",
            instance = %self.instance,
            version = %version,
            metrics = metrics,
            destinations = destinations,
            "Metric sentinel started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "sentinel_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Metric sentinel shutting down"
        );
    }

    pub fn log_anomaly(
        &self,
        metric: &str,
        current_value: f64,
        reference_value: f64,
        relative_change: f64,
        threshold: f64,
    ) {
        info!(
            event = "anomaly_detected",
            instance = %self.instance,
            metric = %metric,
            current_value = current_value,
            reference_value = reference_value,
            relative_change = relative_change,
            threshold = threshold,
            "Anomaly detected"
        );
    }

    pub fn log_cannot_evaluate(&self, metric: &str, reason: UnevaluableReason) {
        debug!(
            event = "evaluation_skipped",
            instance = %self.instance,
            metric = %metric,
            reason = %reason,
            "Metric could not be evaluated"
        );
    }

    pub fn log_suppressed(&self, metric: &str, decision: &ThrottleDecision) {
        match decision {
            ThrottleDecision::CapReached { sent_today, cap } => {
                info!(
                    event = "alert_suppressed",
                    instance = %self.instance,
                    metric = %metric,
                    reason = "daily_cap",
                    sent_today = sent_today,
                    daily_cap = cap,
                    "Daily alert cap reached, alert suppressed"
                );
            }
            ThrottleDecision::Cooldown {
                last_emitted_at,
                remaining,
            } => {
                info!(
                    event = "alert_suppressed",
                    instance = %self.instance,
                    metric = %metric,
                    reason = "cooldown",
                    last_emitted_at = %last_emitted_at,
                    remaining_secs = remaining.num_seconds(),
                    "Alert cooldown in effect, alert suppressed"
                );
            }
            ThrottleDecision::Allow => {}
        }
    }

    pub fn log_emitted(&self, metric: &str, relative_change: f64, destinations: usize) {
        info!(
            event = "alert_emitted",
            instance = %self.instance,
            metric = %metric,
            relative_change = relative_change,
            destinations = destinations,
            "Alert sent"
        );
    }

    pub fn log_delivery_failure(&self, metric: &str, destination: &str, error: &str) {
        error!(
            event = "delivery_failed",
            instance = %self.instance,
            metric = %metric,
            destination = %destination,
            error = %error,
            "Failed to deliver alert"
        );
    }

    pub fn log_chart_failure(&self, metric: &str, error: &str) {
        warn!(
            event = "chart_failed",
            instance = %self.instance,
            metric = %metric,
            error = %error,
            "Alert chart not delivered, text alert unaffected"
        );
    }

    pub fn log_source_failure(&self, metric: &str, error: &str) {
        warn!(
            event = "source_failed",
            instance = %self.instance,
            metric = %metric,
            error = %error,
            "Failed to fetch metric series"
        );
    }

    pub fn log_throttle_store_failure(&self, metric: &str, error: &str) {
        error!(
            event = "throttle_store_failed",
            instance = %self.instance,
            metric = %metric,
            error = %error,
            "Throttle store operation failed"
        );
    }

    pub fn log_cycle(&self, evaluated: usize, emitted: usize, suppressed: usize, failed: usize, elapsed_ms: u128) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            metrics = evaluated,
            emitted = emitted,
            suppressed = suppressed,
            failed = failed,
            elapsed_ms = elapsed_ms as u64,
            "Evaluation cycle complete"
        );
    }
}
