//! Metric Sentinel - week-over-week product metric alerting
//!
//! This binary evaluates the configured metrics on a schedule, throttles
//! the resulting alerts and delivers them to Telegram.

use anyhow::{Context, Result};
use sentinel_lib::{
    anomaly::{AlertThrottle, FileThrottleStore},
    api::{self, AppState},
    chart::PngChartRenderer,
    health::HealthRegistry,
    notify::{LogNotifier, Notifier, TelegramNotifier},
    observability::{SentinelMetrics, StructuredLogger},
    source::{ClickHouseClient, ClickHouseSource},
    AlertOrchestrator, CycleScheduler, MonitoredMetric, SentinelConfig, SystemClock,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const SENTINEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Destination used by the log notifier when no chats are configured
const DRY_RUN_DESTINATION: &str = "dry-run";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting metric-sentinel");

    let config = config::load()?;
    info!(
        instance = %config.instance_name,
        metrics = config.metrics.len(),
        dry_run = config.telegram.dry_run,
        "Sentinel configured"
    );

    let health_registry = HealthRegistry::new();

    let metrics = SentinelMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);

    let throttle = Arc::new(build_throttle(&config)?);
    let (notifier, destinations) = build_notifier(&config)?;
    let monitored = build_metrics(&config)?;

    let mut orchestrator = AlertOrchestrator::new(
        throttle.clone(),
        notifier,
        destinations.clone(),
        config.throttle_policy(),
    )
    .with_lookback(config.lookback())
    .with_logger(logger.clone());
    if config.telegram.send_charts {
        orchestrator = orchestrator.with_chart_renderer(Arc::new(PngChartRenderer::default()));
    }

    let scheduler = Arc::new(
        CycleScheduler::new(
            Arc::new(orchestrator),
            monitored,
            Arc::new(SystemClock),
            config.schedule_interval(),
            health_registry.clone(),
        )
        .with_logger(logger.clone()),
    );

    logger.log_startup(SENTINEL_VERSION, config.metrics.len(), destinations.len());

    // Create shared application state
    let app_state = Arc::new(
        AppState::new(
            health_registry.clone(),
            metrics,
            throttle,
            config.throttle_policy(),
        )
        .with_scheduler(scheduler.clone()),
    );

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // Mark sentinel as ready after initialization
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    if tokio::time::timeout(Duration::from_secs(30), scheduler_handle)
        .await
        .is_err()
    {
        warn!("Scheduler did not stop within 30s");
    }
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}

fn build_throttle(config: &SentinelConfig) -> Result<AlertThrottle> {
    match &config.throttle_store.path {
        Some(path) => {
            let store = FileThrottleStore::open(path)
                .with_context(|| format!("Failed to open throttle store {}", path.display()))?;
            info!(path = %path.display(), "Using file-backed throttle store");
            Ok(AlertThrottle::with_store(Box::new(store)))
        }
        None => Ok(AlertThrottle::in_memory()),
    }
}

fn build_notifier(config: &SentinelConfig) -> Result<(Arc<dyn Notifier>, Vec<String>)> {
    let telegram = &config.telegram;

    if telegram.dry_run {
        let destinations = if telegram.chat_ids.is_empty() {
            vec![DRY_RUN_DESTINATION.to_string()]
        } else {
            telegram.chat_ids.clone()
        };
        info!("Dry run: alerts are logged, not sent");
        return Ok((Arc::new(LogNotifier::new()), destinations));
    }

    let token = telegram
        .bot_token
        .clone()
        .context("telegram.bot_token is not set")?;
    let notifier = TelegramNotifier::with_api_base(
        token,
        &telegram.api_base,
        Duration::from_secs(telegram.timeout_secs),
    )
    .context("Failed to create Telegram client")?;

    Ok((Arc::new(notifier), telegram.chat_ids.clone()))
}

/// One source per dataset so metrics of a dataset share its frame cache
fn build_metrics(config: &SentinelConfig) -> Result<Vec<MonitoredMetric>> {
    let client = Arc::new(
        ClickHouseClient::new(config.clickhouse_config())
            .context("Failed to create ClickHouse client")?,
    );

    let mut sources: HashMap<String, Arc<ClickHouseSource>> = HashMap::new();
    let mut monitored = Vec::with_capacity(config.metrics.len());

    for metric in &config.metrics {
        let source = match sources.get(&metric.dataset) {
            Some(source) => source.clone(),
            None => {
                let dataset = config
                    .dataset(&metric.dataset)
                    .with_context(|| format!("Unknown dataset '{}'", metric.dataset))?;
                let source = Arc::new(ClickHouseSource::new(client.clone(), dataset));
                sources.insert(metric.dataset.clone(), source.clone());
                source
            }
        };

        monitored.push(MonitoredMetric::new(
            metric.name.clone(),
            metric.display_name(),
            config.threshold_for(metric),
            source,
        ));
    }

    Ok(monitored)
}
