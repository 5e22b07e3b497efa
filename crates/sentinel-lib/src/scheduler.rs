//! Cycle scheduling
//!
//! Runs the orchestrator on a fixed interval until shutdown, reporting each
//! cycle to the health registry and Prometheus.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::health::HealthRegistry;
use crate::observability::{SentinelMetrics, StructuredLogger};
use crate::orchestrator::{AlertOrchestrator, CycleReport, MonitoredMetric};

/// Source of the `now` passed to each cycle
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time; the datasets are bucketed in local time too
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Settable clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Periodically runs a cycle over the configured metrics
pub struct CycleScheduler {
    orchestrator: Arc<AlertOrchestrator>,
    metrics: Vec<MonitoredMetric>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    health: HealthRegistry,
    sentinel_metrics: SentinelMetrics,
    logger: StructuredLogger,
    last_report: RwLock<Option<CycleReport>>,
}

impl CycleScheduler {
    pub fn new(
        orchestrator: Arc<AlertOrchestrator>,
        metrics: Vec<MonitoredMetric>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        health: HealthRegistry,
    ) -> Self {
        let sentinel_metrics = SentinelMetrics::new();
        sentinel_metrics.set_metrics_configured(metrics.len() as i64);

        Self {
            orchestrator,
            metrics,
            clock,
            interval,
            health,
            sentinel_metrics,
            logger: StructuredLogger::new("metric-sentinel"),
            last_report: RwLock::new(None),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.name.clone()).collect()
    }

    /// Report of the most recent cycle, if any ran
    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    /// Run cycles until a shutdown signal arrives. The first cycle starts
    /// immediately.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            metrics = self.metrics.len(),
            "Starting evaluation scheduler"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down evaluation scheduler");
                    break;
                }
            }
        }
    }

    /// Run a single cycle at the clock's current time
    pub async fn run_once(&self) -> CycleReport {
        let start = Instant::now();
        let now = self.clock.now();
        debug!(now = %now, "Starting evaluation cycle");

        let report = self.orchestrator.run_cycle(&self.metrics, now).await;

        let elapsed = start.elapsed();
        self.sentinel_metrics
            .observe_cycle_latency(elapsed.as_secs_f64());
        self.logger.log_cycle(
            report.outcomes.len(),
            report.emitted(),
            report.suppressed(),
            report.failed(),
            elapsed.as_millis(),
        );
        self.update_health(&report).await;

        *self.last_report.write().await = Some(report.clone());
        report
    }

    async fn update_health(&self, report: &CycleReport) {
        let store = self
            .orchestrator
            .throttle()
            .snapshot()
            .map(|_| ())
            .map_err(|e| e.to_string());
        self.health.observe_cycle(report, store).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AlertThrottle, ThrottlePolicy};
    use crate::health::{Component, ComponentStatus};
    use crate::models::{MetricSeries, Observation};
    use crate::notify::LogNotifier;
    use crate::orchestrator::MetricOutcome;
    use crate::source::{SeriesProvider, SourceError};
    use async_trait::async_trait;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    struct WeekProvider {
        fail: bool,
    }

    #[async_trait]
    impl SeriesProvider for WeekProvider {
        async fn fetch_series(
            &self,
            metric: &str,
            _lookback: chrono::Duration,
        ) -> Result<MetricSeries, SourceError> {
            if self.fail {
                return Err(SourceError::Status {
                    status: 500,
                    body: "Code: 60. Table does not exist".to_string(),
                });
            }
            Ok(MetricSeries::new(
                metric,
                vec![
                    Observation::new(ts("2025-07-11 12:00:00"), 10.0),
                    Observation::new(ts("2025-07-18 12:00:00"), 14.0),
                ],
            )
            .unwrap())
        }
    }

    fn scheduler(clock: Arc<FixedClock>, failing: &[bool], health: HealthRegistry) -> CycleScheduler {
        let orchestrator = Arc::new(AlertOrchestrator::new(
            Arc::new(AlertThrottle::in_memory()),
            Arc::new(LogNotifier::new()),
            vec!["dry-run".to_string()],
            ThrottlePolicy::default(),
        ));
        let metrics = failing
            .iter()
            .enumerate()
            .map(|(i, &fail)| {
                MonitoredMetric::new(
                    format!("metric_{}", i),
                    format!("Metric {}", i),
                    0.3,
                    Arc::new(WeekProvider { fail }),
                )
            })
            .collect();

        CycleScheduler::new(
            orchestrator,
            metrics,
            clock,
            Duration::from_millis(20),
            health,
        )
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::new(ts("2025-07-18 12:00:00"));
        clock.advance(chrono::Duration::minutes(15));
        assert_eq!(clock.now(), ts("2025-07-18 12:15:00"));

        clock.set(ts("2025-07-19 00:00:00"));
        assert_eq!(clock.now(), ts("2025-07-19 00:00:00"));
    }

    #[tokio::test]
    async fn test_run_once_uses_clock_and_stores_report() {
        let clock = Arc::new(FixedClock::new(ts("2025-07-18 12:05:00")));
        let scheduler = scheduler(clock, &[false], HealthRegistry::new());

        assert!(scheduler.last_report().await.is_none());
        let report = scheduler.run_once().await;

        assert_eq!(report.started_at, Some(ts("2025-07-18 12:05:00")));
        assert_eq!(report.emitted(), 1);
        assert_eq!(scheduler.last_report().await, Some(report));
    }

    #[tokio::test]
    async fn test_partial_source_failure_degrades_health() {
        let health = HealthRegistry::new();
        let clock = Arc::new(FixedClock::new(ts("2025-07-18 12:05:00")));
        let scheduler = scheduler(clock, &[false, true], health.clone());

        scheduler.run_once().await;

        let status = health.health().await;
        assert_eq!(
            status.components[&Component::Source].status,
            ComponentStatus::Degraded
        );
        assert_eq!(
            status.components[&Component::Notifier].status,
            ComponentStatus::Healthy
        );
        assert_eq!(
            status.components[&Component::Scheduler].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_total_source_failure_is_unhealthy() {
        let health = HealthRegistry::new();
        let clock = Arc::new(FixedClock::new(ts("2025-07-18 12:05:00")));
        let scheduler = scheduler(clock, &[true, true], health.clone());

        scheduler.run_once().await;

        assert_eq!(health.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_throttles_between_ticks() {
        let clock = Arc::new(FixedClock::new(ts("2025-07-18 12:05:00")));
        let scheduler = Arc::new(scheduler(clock, &[false], HealthRegistry::new()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(scheduler.clone().run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        // Every tick after the first sees the cooldown
        let last = scheduler.last_report().await.unwrap();
        assert!(matches!(
            last.outcomes[0].outcome,
            MetricOutcome::Suppressed { .. } | MetricOutcome::Emitted { .. }
        ));
        let history = scheduler.orchestrator.throttle().snapshot().unwrap();
        assert_eq!(history["metric_0"].len(), 1);
    }
}
