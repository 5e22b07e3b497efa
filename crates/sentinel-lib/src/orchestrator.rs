//! Alert orchestration
//!
//! One cycle walks the configured metrics in order: fetch the series,
//! evaluate it, pass anomalies through the throttle gate, deliver the
//! notification and record the emission once it reached a destination.
//! Failures of one metric never abort the cycle.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::anomaly::{
    evaluate, AlertThrottle, EvaluationStatus, SuppressionReason, ThrottleDecision,
    ThrottlePolicy, UnevaluableReason,
};
use crate::chart::{Chart, ChartRenderer};
use crate::models::MetricSeries;
use crate::notify::{Notification, Notifier};
use crate::observability::{SentinelMetrics, StructuredLogger};
use crate::source::{SeriesProvider, DEFAULT_LOOKBACK_DAYS};

/// A metric evaluated every cycle
#[derive(Clone)]
pub struct MonitoredMetric {
    pub name: String,
    pub display_name: String,
    pub threshold: f64,
    pub provider: Arc<dyn SeriesProvider>,
}

impl MonitoredMetric {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        threshold: f64,
        provider: Arc<dyn SeriesProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            threshold,
            provider,
        }
    }
}

/// What happened to one metric during a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MetricOutcome {
    SourceFailed { error: String },
    CannotEvaluate { reason: UnevaluableReason },
    Normal { relative_change: f64 },
    Suppressed {
        reason: SuppressionReason,
        relative_change: f64,
    },
    Emitted {
        relative_change: f64,
        destinations: usize,
    },
    DeliveryFailed { error: String },
}

impl MetricOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            MetricOutcome::SourceFailed { .. } => "source_failed",
            MetricOutcome::CannotEvaluate { .. } => "cannot_evaluate",
            MetricOutcome::Normal { .. } => "normal",
            MetricOutcome::Suppressed { .. } => "suppressed",
            MetricOutcome::Emitted { .. } => "emitted",
            MetricOutcome::DeliveryFailed { .. } => "delivery_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub metric: String,
    #[serde(flatten)]
    pub outcome: MetricOutcome,
}

/// Result of one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: Option<NaiveDateTime>,
    pub outcomes: Vec<MetricReport>,
    /// Notifications that were delivered, in metric order
    pub notifications: Vec<Notification>,
}

impl CycleReport {
    fn count(&self, pred: impl Fn(&MetricOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn emitted(&self) -> usize {
        self.count(|o| matches!(o, MetricOutcome::Emitted { .. }))
    }

    pub fn suppressed(&self) -> usize {
        self.count(|o| matches!(o, MetricOutcome::Suppressed { .. }))
    }

    /// Source and delivery failures
    pub fn failed(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                MetricOutcome::SourceFailed { .. } | MetricOutcome::DeliveryFailed { .. }
            )
        })
    }

    pub fn source_failures(&self) -> usize {
        self.count(|o| matches!(o, MetricOutcome::SourceFailed { .. }))
    }

    pub fn delivery_failures(&self) -> usize {
        self.count(|o| matches!(o, MetricOutcome::DeliveryFailed { .. }))
    }
}

/// Drives evaluation, throttling and delivery for a list of metrics
pub struct AlertOrchestrator {
    throttle: Arc<AlertThrottle>,
    notifier: Arc<dyn Notifier>,
    renderer: Option<Arc<dyn ChartRenderer>>,
    destinations: Vec<String>,
    policy: ThrottlePolicy,
    lookback: Duration,
    metrics: SentinelMetrics,
    logger: StructuredLogger,
}

impl AlertOrchestrator {
    pub fn new(
        throttle: Arc<AlertThrottle>,
        notifier: Arc<dyn Notifier>,
        destinations: Vec<String>,
        policy: ThrottlePolicy,
    ) -> Self {
        Self {
            throttle,
            notifier,
            renderer: None,
            destinations,
            policy,
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
            metrics: SentinelMetrics::new(),
            logger: StructuredLogger::new("metric-sentinel"),
        }
    }

    /// Attach a comparison chart to every alert
    pub fn with_chart_renderer(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn throttle(&self) -> &Arc<AlertThrottle> {
        &self.throttle
    }

    pub fn policy(&self) -> ThrottlePolicy {
        self.policy
    }

    /// Run one pass over `metrics` at `now`.
    ///
    /// Metrics are processed sequentially, so a name listed twice sees the
    /// emission recorded for its first occurrence.
    pub async fn run_cycle(&self, metrics: &[MonitoredMetric], now: NaiveDateTime) -> CycleReport {
        let mut report = CycleReport {
            started_at: Some(now),
            ..CycleReport::default()
        };

        for metric in metrics {
            let (outcome, notification) = self.process(metric, now).await;
            report.outcomes.push(MetricReport {
                metric: metric.name.clone(),
                outcome,
            });
            report.notifications.extend(notification);
        }

        report
    }

    async fn process(
        &self,
        metric: &MonitoredMetric,
        now: NaiveDateTime,
    ) -> (MetricOutcome, Option<Notification>) {
        let series = match metric.provider.fetch_series(&metric.name, self.lookback).await {
            Ok(series) => series,
            Err(e) => {
                self.logger.log_source_failure(&metric.name, &e.to_string());
                self.metrics.inc_source_failures(&metric.name);
                return (MetricOutcome::SourceFailed { error: e.to_string() }, None);
            }
        };

        let result = evaluate(&series, metric.threshold);
        if let EvaluationStatus::CannotEvaluate(reason) = result.status {
            self.logger.log_cannot_evaluate(&metric.name, reason);
            self.metrics
                .inc_evaluations_skipped(&metric.name, &reason.to_string());
            return (MetricOutcome::CannotEvaluate { reason }, None);
        }

        let relative_change = result.relative_change.unwrap_or(0.0);
        if !result.is_anomalous {
            return (MetricOutcome::Normal { relative_change }, None);
        }

        self.logger.log_anomaly(
            &metric.name,
            result.current_value.unwrap_or_default(),
            result.reference_value.unwrap_or_default(),
            relative_change,
            metric.threshold,
        );
        self.metrics.inc_anomalies_detected(&metric.name);

        // Held until the emission is recorded
        let _guard = self.throttle.lock_metric(&metric.name).await;

        let decision = match self.throttle.check(&metric.name, now, &self.policy) {
            Ok(decision) => decision,
            Err(e) => {
                self.logger
                    .log_throttle_store_failure(&metric.name, &e.to_string());
                ThrottleDecision::Allow
            }
        };
        if let Some(reason) = decision.suppression_reason() {
            self.logger.log_suppressed(&metric.name, &decision);
            self.metrics
                .inc_alerts_suppressed(&metric.name, reason.as_str());
            return (
                MetricOutcome::Suppressed {
                    reason,
                    relative_change,
                },
                None,
            );
        }

        let Some(notification) = Notification::from_evaluation(
            &metric.name,
            &metric.display_name,
            &result,
            now,
            self.policy.cooldown,
        ) else {
            return (MetricOutcome::Normal { relative_change }, None);
        };

        match self.deliver(metric, &series, &notification).await {
            Ok(destinations) => {
                if let Err(e) = self.throttle.record(&metric.name, now) {
                    self.logger
                        .log_throttle_store_failure(&metric.name, &e.to_string());
                }
                self.logger
                    .log_emitted(&metric.name, relative_change, destinations);
                self.metrics.inc_alerts_emitted(&metric.name);
                (
                    MetricOutcome::Emitted {
                        relative_change,
                        destinations,
                    },
                    Some(notification),
                )
            }
            Err(error) => (MetricOutcome::DeliveryFailed { error }, None),
        }
    }

    /// Send the text (and chart) to every destination.
    ///
    /// Returns how many destinations received the text; an error when none
    /// did. Chart failures never fail the delivery.
    async fn deliver(
        &self,
        metric: &MonitoredMetric,
        series: &MetricSeries,
        notification: &Notification,
    ) -> Result<usize, String> {
        if self.destinations.is_empty() {
            return Err("no destinations configured".to_string());
        }

        let chart = self.render_chart(metric, series, notification);
        let text = notification.render_html();

        let mut delivered = 0;
        let mut last_error = None;

        for destination in &self.destinations {
            if let Err(e) = self.notifier.send_text(destination, &text).await {
                self.logger
                    .log_delivery_failure(&metric.name, destination, &e.to_string());
                self.metrics.inc_delivery_failures(&metric.name);
                last_error = Some(format!("{}: {}", destination, e));
                continue;
            }
            delivered += 1;

            if let Some(chart) = &chart {
                if let Err(e) = self.notifier.send_image(destination, chart).await {
                    self.logger.log_chart_failure(&metric.name, &e.to_string());
                }
            }
        }

        if delivered == 0 {
            return Err(last_error.unwrap_or_else(|| "delivery failed".to_string()));
        }
        Ok(delivered)
    }

    fn render_chart(
        &self,
        metric: &MonitoredMetric,
        series: &MetricSeries,
        notification: &Notification,
    ) -> Option<Chart> {
        let renderer = self.renderer.as_ref()?;
        match renderer.render(
            &metric.display_name,
            series,
            notification.current_timestamp.date(),
            notification.reference_timestamp.date(),
        ) {
            Ok(chart) => Some(chart),
            Err(e) => {
                self.logger.log_chart_failure(&metric.name, &e.to_string());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AlertRecord, InMemoryThrottleStore, StoreError, ThrottleStore};
    use crate::chart::ChartError;
    use crate::models::Observation;
    use crate::notify::DeliveryError;
    use crate::source::SourceError;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    struct StaticProvider {
        series: Option<MetricSeries>,
    }

    #[async_trait]
    impl SeriesProvider for StaticProvider {
        async fn fetch_series(&self, metric: &str, _lookback: Duration) -> Result<MetricSeries, SourceError> {
            self.series.clone().ok_or_else(|| SourceError::MissingColumn {
                dataset: "test".to_string(),
                column: metric.to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        fail_text: AtomicBool,
        fail_image: AtomicBool,
        texts: Mutex<Vec<(String, String)>>,
        images: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        fn texts(&self) -> Vec<(String, String)> {
            self.texts.lock().unwrap().clone()
        }

        fn images(&self) -> Vec<(String, String)> {
            self.images.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_text(&self, destination: &str, text: &str) -> Result<(), DeliveryError> {
            if self.fail_text.load(Ordering::SeqCst) || destination == "unreachable" {
                return Err(DeliveryError::Rejected {
                    status: 400,
                    description: "chat not found".to_string(),
                });
            }
            self.texts
                .lock()
                .unwrap()
                .push((destination.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_image(&self, destination: &str, chart: &Chart) -> Result<(), DeliveryError> {
            if self.fail_image.load(Ordering::SeqCst) {
                return Err(DeliveryError::Rejected {
                    status: 413,
                    description: "too large".to_string(),
                });
            }
            self.images
                .lock()
                .unwrap()
                .push((destination.to_string(), chart.file_name.clone()));
            Ok(())
        }
    }

    struct StaticChart;

    impl ChartRenderer for StaticChart {
        fn render(
            &self,
            _title: &str,
            series: &MetricSeries,
            _current: NaiveDate,
            _reference: NaiveDate,
        ) -> Result<Chart, ChartError> {
            Ok(Chart {
                file_name: format!("{}.svg", series.metric()),
                mime_type: "image/svg+xml".to_string(),
                bytes: b"<svg/>".to_vec(),
            })
        }
    }

    struct BrokenStore;

    impl ThrottleStore for BrokenStore {
        fn get_records(&self, _metric: &str) -> Result<Vec<AlertRecord>, StoreError> {
            Err(StoreError::Io {
                path: "/nonexistent".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk gone"),
            })
        }

        fn append_record(&mut self, _record: AlertRecord) -> Result<(), StoreError> {
            Ok(())
        }

        fn purge_other_days(&mut self, _day: NaiveDate) -> Result<usize, StoreError> {
            Ok(0)
        }

        fn snapshot(&self) -> Result<BTreeMap<String, Vec<AlertRecord>>, StoreError> {
            Ok(BTreeMap::new())
        }
    }

    fn views_series(reference: Option<f64>, current: f64) -> MetricSeries {
        let mut observations = Vec::new();
        if let Some(value) = reference {
            observations.push(Observation::new(ts("2025-07-11 12:00:00"), value));
        }
        observations.push(Observation::new(ts("2025-07-18 11:45:00"), 10.0));
        observations.push(Observation::new(ts("2025-07-18 12:00:00"), current));
        MetricSeries::new("views_per_user", observations).unwrap()
    }

    fn metric(name: &str, series: Option<MetricSeries>) -> MonitoredMetric {
        MonitoredMetric::new(name, "Views per user", 0.3, Arc::new(StaticProvider { series }))
    }

    fn orchestrator(notifier: Arc<RecordingNotifier>, destinations: &[&str]) -> AlertOrchestrator {
        AlertOrchestrator::new(
            Arc::new(AlertThrottle::in_memory()),
            notifier,
            destinations.iter().map(|d| d.to_string()).collect(),
            ThrottlePolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_anomaly_emits_once_then_cooldown_suppresses() {
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = orchestrator(notifier.clone(), &["-969316925"]);
        let metrics = vec![metric("views_per_user", Some(views_series(Some(10.0), 14.0)))];

        let now = ts("2025-07-18 12:05:00");
        let first = orchestrator.run_cycle(&metrics, now).await;

        assert_eq!(first.emitted(), 1);
        assert_eq!(first.notifications.len(), 1);
        let notification = &first.notifications[0];
        assert_eq!(notification.metric_name, "views_per_user");
        assert!((notification.relative_change - 0.4).abs() < 1e-12);
        assert_eq!(notifier.texts().len(), 1);
        assert!(notifier.texts()[0].1.contains("+40.0%"));

        let second = orchestrator
            .run_cycle(&metrics, now + Duration::minutes(1))
            .await;

        assert!(second.notifications.is_empty());
        assert_eq!(
            second.outcomes[0].outcome,
            MetricOutcome::Suppressed {
                reason: SuppressionReason::Cooldown,
                relative_change: first.notifications[0].relative_change,
            }
        );
        assert_eq!(notifier.texts().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_reference_emits_nothing_and_leaves_throttle_untouched() {
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = orchestrator(notifier.clone(), &["1"]);
        let metrics = vec![metric("views_per_user", Some(views_series(None, 14.0)))];

        let report = orchestrator
            .run_cycle(&metrics, ts("2025-07-18 12:05:00"))
            .await;

        assert_eq!(
            report.outcomes[0].outcome,
            MetricOutcome::CannotEvaluate {
                reason: UnevaluableReason::MissingReference
            }
        );
        assert!(report.notifications.is_empty());
        assert!(notifier.texts().is_empty());
        assert!(orchestrator.throttle().snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_not_recorded_and_retry_is_allowed() {
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.fail_text.store(true, Ordering::SeqCst);
        let orchestrator = orchestrator(notifier.clone(), &["1"]);
        let metrics = vec![metric("views_per_user", Some(views_series(Some(10.0), 14.0)))];

        let now = ts("2025-07-18 12:05:00");
        let failed = orchestrator.run_cycle(&metrics, now).await;

        assert!(matches!(
            failed.outcomes[0].outcome,
            MetricOutcome::DeliveryFailed { .. }
        ));
        assert!(failed.notifications.is_empty());
        assert!(orchestrator.throttle().snapshot().unwrap().is_empty());

        notifier.fail_text.store(false, Ordering::SeqCst);
        let retried = orchestrator
            .run_cycle(&metrics, now + Duration::minutes(1))
            .await;

        assert_eq!(retried.emitted(), 1);
        assert_eq!(notifier.texts().len(), 1);
    }

    #[tokio::test]
    async fn test_normal_metric_skips_throttle() {
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = orchestrator(notifier.clone(), &["1"]);
        let metrics = vec![metric("views_per_user", Some(views_series(Some(10.0), 11.0)))];

        let report = orchestrator
            .run_cycle(&metrics, ts("2025-07-18 12:05:00"))
            .await;

        assert!(matches!(
            report.outcomes[0].outcome,
            MetricOutcome::Normal { .. }
        ));
        assert!(notifier.texts().is_empty());
        assert!(orchestrator.throttle().snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_does_not_stop_cycle() {
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = orchestrator(notifier.clone(), &["1"]);
        let metrics = vec![
            metric("likes_per_user", None),
            metric("views_per_user", Some(views_series(Some(10.0), 14.0))),
        ];

        let report = orchestrator
            .run_cycle(&metrics, ts("2025-07-18 12:05:00"))
            .await;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].outcome.label(), "source_failed");
        assert_eq!(report.outcomes[1].outcome.label(), "emitted");
        assert_eq!(report.failed(), 1);
        assert_eq!(report.emitted(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_metric_sees_earlier_emission() {
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = orchestrator(notifier.clone(), &["1"]);
        let series = views_series(Some(10.0), 14.0);
        let metrics = vec![
            metric("views_per_user", Some(series.clone())),
            metric("views_per_user", Some(series)),
        ];

        let report = orchestrator
            .run_cycle(&metrics, ts("2025-07-18 12:05:00"))
            .await;

        assert_eq!(report.emitted(), 1);
        assert_eq!(report.suppressed(), 1);
        assert_eq!(notifier.texts().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_delivery_counts_as_emitted() {
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = orchestrator(notifier.clone(), &["unreachable", "2"]);
        let metrics = vec![metric("views_per_user", Some(views_series(Some(10.0), 14.0)))];

        let report = orchestrator
            .run_cycle(&metrics, ts("2025-07-18 12:05:00"))
            .await;

        assert_eq!(
            report.outcomes[0].outcome,
            MetricOutcome::Emitted {
                relative_change: report.notifications[0].relative_change,
                destinations: 1,
            }
        );
        assert_eq!(orchestrator.throttle().snapshot().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_chart_failure_does_not_block_alert() {
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.fail_image.store(true, Ordering::SeqCst);
        let orchestrator =
            orchestrator(notifier.clone(), &["1"]).with_chart_renderer(Arc::new(StaticChart));
        let metrics = vec![metric("views_per_user", Some(views_series(Some(10.0), 14.0)))];

        let report = orchestrator
            .run_cycle(&metrics, ts("2025-07-18 12:05:00"))
            .await;

        assert_eq!(report.emitted(), 1);
        assert!(notifier.images().is_empty());
    }

    #[tokio::test]
    async fn test_chart_sent_after_text() {
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator =
            orchestrator(notifier.clone(), &["1"]).with_chart_renderer(Arc::new(StaticChart));
        let metrics = vec![metric("views_per_user", Some(views_series(Some(10.0), 14.0)))];

        orchestrator
            .run_cycle(&metrics, ts("2025-07-18 12:05:00"))
            .await;

        assert_eq!(
            notifier.images(),
            vec![("1".to_string(), "views_per_user.svg".to_string())]
        );
    }

    #[tokio::test]
    async fn test_daily_cap_suppresses_before_cooldown() {
        let notifier = Arc::new(RecordingNotifier::default());
        let throttle = Arc::new(AlertThrottle::with_store(Box::new(InMemoryThrottleStore::new())));
        throttle
            .record("views_per_user", ts("2025-07-18 00:10:00"))
            .unwrap();
        let orchestrator = AlertOrchestrator::new(
            throttle,
            notifier.clone(),
            vec!["1".to_string()],
            ThrottlePolicy::new(Duration::zero(), 1),
        );
        let metrics = vec![metric("views_per_user", Some(views_series(Some(10.0), 14.0)))];

        let report = orchestrator
            .run_cycle(&metrics, ts("2025-07-18 12:05:00"))
            .await;

        assert!(matches!(
            report.outcomes[0].outcome,
            MetricOutcome::Suppressed {
                reason: SuppressionReason::DailyCap,
                ..
            }
        ));
        assert!(notifier.texts().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = AlertOrchestrator::new(
            Arc::new(AlertThrottle::with_store(Box::new(BrokenStore))),
            notifier.clone(),
            vec!["1".to_string()],
            ThrottlePolicy::default(),
        );
        let metrics = vec![metric("views_per_user", Some(views_series(Some(10.0), 14.0)))];

        let report = orchestrator
            .run_cycle(&metrics, ts("2025-07-18 12:05:00"))
            .await;

        assert_eq!(report.emitted(), 1);
    }
}
