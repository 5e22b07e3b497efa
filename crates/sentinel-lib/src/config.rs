//! Sentinel configuration
//!
//! The daemon deserializes [`SentinelConfig`] from a file layered under
//! environment variables; this module owns the types, their defaults and
//! the startup validation.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::anomaly::{ThrottlePolicy, DEFAULT_COOLDOWN_SECS, DEFAULT_DAILY_CAP, DEFAULT_THRESHOLD};
use crate::notify::DEFAULT_TELEGRAM_API;
use crate::source::{presets, ClickHouseConfig, Dataset, DEFAULT_LOOKBACK_DAYS};

/// Default schedule interval (15 minutes, the dataset bucket width)
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 15 * 60;

/// The series must reach back at least one week plus the current day
pub const MIN_LOOKBACK_DAYS: i64 = 8;

pub const MAX_LOOKBACK_DAYS: i64 = 366;

/// Alert history only covers the current day, a longer cooldown never applies
pub const MAX_COOLDOWN_SECS: u64 = 24 * 60 * 60;

pub const MAX_SCHEDULE_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("threshold for '{scope}' must be finite and greater than 0, got {value}")]
    InvalidThreshold { scope: String, value: f64 },

    #[error("daily_cap must be at least 1")]
    InvalidDailyCap,

    #[error("schedule_interval_secs must be between 1 and {max}, got {value}")]
    InvalidScheduleInterval { max: u64, value: u64 },

    #[error("cooldown_secs must be at most {max}, got {value}")]
    InvalidCooldown { max: u64, value: u64 },

    #[error("lookback_days must be between {min} and {max}, got {value}")]
    InvalidLookback { min: i64, max: i64, value: i64 },

    #[error("no metrics configured")]
    NoMetrics,

    #[error("metric '{0}' is configured more than once")]
    DuplicateMetric(String),

    #[error("metric '{metric}' references unknown dataset '{dataset}'")]
    UnknownDataset { metric: String, dataset: String },

    #[error("no telegram chat_ids configured")]
    NoDestinations,

    #[error("telegram bot_token is required unless dry_run is enabled")]
    MissingBotToken,

    #[error("invalid {field} url '{value}': {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Detection and throttling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub threshold: f64,
    pub cooldown_secs: u64,
    pub daily_cap: u32,
    pub schedule_interval_secs: u64,
    pub lookback_days: i64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS as u64,
            daily_cap: DEFAULT_DAILY_CAP,
            schedule_interval_secs: DEFAULT_SCHEDULE_INTERVAL_SECS,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickHouseSettings {
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub timeout_secs: u64,
    pub cache_ttl_secs: u64,
}

impl Default for ClickHouseSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "default".to_string(),
            user: "default".to_string(),
            password: None,
            timeout_secs: 30,
            cache_ttl_secs: 60,
        }
    }
}

/// One monitored metric: a column of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    /// Name shown in alerts; defaults to `name`
    #[serde(default)]
    pub display_name: Option<String>,
    pub dataset: String,
    /// Per-metric override of `alerting.threshold`
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl MetricConfig {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_ids: Vec<String>,
    pub api_base: String,
    pub timeout_secs: u64,
    /// Log notifications instead of sending them
    pub dry_run: bool,
    /// Attach the comparison chart to each alert
    pub send_charts: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_ids: Vec::new(),
            api_base: DEFAULT_TELEGRAM_API.to_string(),
            timeout_secs: 15,
            dry_run: false,
            send_charts: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleStoreConfig {
    /// JSON file holding the alert history; in-memory when unset
    pub path: Option<PathBuf>,
}

/// Complete daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub instance_name: String,
    pub api_port: u16,
    pub alerting: AlertingConfig,
    pub clickhouse: ClickHouseSettings,
    /// Dataset name to SQL template
    pub datasets: BTreeMap<String, String>,
    pub metrics: Vec<MetricConfig>,
    pub telegram: TelegramConfig,
    pub throttle_store: ThrottleStoreConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            instance_name: "metric-sentinel".to_string(),
            api_port: 8080,
            alerting: AlertingConfig::default(),
            clickhouse: ClickHouseSettings::default(),
            datasets: default_datasets(),
            metrics: default_metrics(),
            telegram: TelegramConfig::default(),
            throttle_store: ThrottleStoreConfig::default(),
        }
    }
}

fn default_datasets() -> BTreeMap<String, String> {
    [
        presets::feed_dataset(presets::DEFAULT_FEED_TABLE),
        presets::messages_dataset(presets::DEFAULT_MESSAGES_TABLE),
    ]
    .into_iter()
    .map(|d| (d.name, d.sql))
    .collect()
}

fn default_metrics() -> Vec<MetricConfig> {
    presets::default_metrics()
        .into_iter()
        .map(|(name, display, dataset)| MetricConfig {
            name: name.to_string(),
            display_name: Some(display.to_string()),
            dataset: dataset.to_string(),
            threshold: None,
        })
        .collect()
}

fn check_threshold(scope: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            scope: scope.to_string(),
            value,
        })
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

impl SentinelConfig {
    /// Reject configurations the daemon must not start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_threshold("alerting", self.alerting.threshold)?;

        if self.alerting.daily_cap < 1 {
            return Err(ConfigError::InvalidDailyCap);
        }
        let interval = self.alerting.schedule_interval_secs;
        if interval == 0 || interval > MAX_SCHEDULE_INTERVAL_SECS {
            return Err(ConfigError::InvalidScheduleInterval {
                max: MAX_SCHEDULE_INTERVAL_SECS,
                value: interval,
            });
        }
        if self.alerting.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(ConfigError::InvalidCooldown {
                max: MAX_COOLDOWN_SECS,
                value: self.alerting.cooldown_secs,
            });
        }
        if !(MIN_LOOKBACK_DAYS..=MAX_LOOKBACK_DAYS).contains(&self.alerting.lookback_days) {
            return Err(ConfigError::InvalidLookback {
                min: MIN_LOOKBACK_DAYS,
                max: MAX_LOOKBACK_DAYS,
                value: self.alerting.lookback_days,
            });
        }

        if self.metrics.is_empty() {
            return Err(ConfigError::NoMetrics);
        }
        let mut seen = HashSet::new();
        for metric in &self.metrics {
            if !seen.insert(metric.name.as_str()) {
                return Err(ConfigError::DuplicateMetric(metric.name.clone()));
            }
            if !self.datasets.contains_key(&metric.dataset) {
                return Err(ConfigError::UnknownDataset {
                    metric: metric.name.clone(),
                    dataset: metric.dataset.clone(),
                });
            }
            if let Some(threshold) = metric.threshold {
                check_threshold(&metric.name, threshold)?;
            }
        }

        check_url("clickhouse", &self.clickhouse.url)?;

        if !self.telegram.dry_run {
            if self.telegram.chat_ids.is_empty() {
                return Err(ConfigError::NoDestinations);
            }
            if self.telegram.bot_token.as_deref().unwrap_or("").is_empty() {
                return Err(ConfigError::MissingBotToken);
            }
            check_url("telegram", &self.telegram.api_base)?;
        }

        Ok(())
    }

    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy::new(
            chrono::Duration::seconds(self.alerting.cooldown_secs.min(MAX_COOLDOWN_SECS) as i64),
            self.alerting.daily_cap,
        )
    }

    pub fn schedule_interval(&self) -> StdDuration {
        StdDuration::from_secs(
            self.alerting
                .schedule_interval_secs
                .min(MAX_SCHEDULE_INTERVAL_SECS),
        )
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(
            self.alerting
                .lookback_days
                .clamp(MIN_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS),
        )
    }

    /// Effective threshold of one metric
    pub fn threshold_for(&self, metric: &MetricConfig) -> f64 {
        metric.threshold.unwrap_or(self.alerting.threshold)
    }

    pub fn clickhouse_config(&self) -> ClickHouseConfig {
        ClickHouseConfig {
            url: self.clickhouse.url.clone(),
            database: self.clickhouse.database.clone(),
            user: self.clickhouse.user.clone(),
            password: self.clickhouse.password.clone(),
            timeout: StdDuration::from_secs(self.clickhouse.timeout_secs),
            cache_ttl: StdDuration::from_secs(self.clickhouse.cache_ttl_secs),
        }
    }

    pub fn dataset(&self, name: &str) -> Option<Dataset> {
        self.datasets
            .get(name)
            .map(|sql| Dataset::new(name, sql.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SentinelConfig {
        let mut config = SentinelConfig::default();
        config.telegram.bot_token = Some("123:abc".to_string());
        config.telegram.chat_ids = vec!["-969316925".to_string()];
        config
    }

    #[test]
    fn test_defaults() {
        let config = SentinelConfig::default();
        assert_eq!(config.alerting.threshold, 0.3);
        assert_eq!(config.alerting.cooldown_secs, 4 * 3600);
        assert_eq!(config.alerting.daily_cap, 6);
        assert_eq!(config.schedule_interval(), StdDuration::from_secs(900));
        assert_eq!(config.lookback(), chrono::Duration::days(14));
        assert_eq!(config.metrics.len(), 4);
        assert!(config.datasets.contains_key("feed"));
        assert!(config.datasets.contains_key("messages"));
    }

    #[test]
    fn test_valid_config_passes() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn test_dry_run_needs_no_destinations() {
        let mut config = SentinelConfig::default();
        config.telegram.dry_run = true;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        for bad in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            let mut config = valid();
            config.alerting.threshold = bad;
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidThreshold { .. })
            ));
        }

        let mut config = valid();
        config.metrics[0].threshold = Some(0.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { scope, .. }) if scope == "views_per_user"
        ));
    }

    #[test]
    fn test_rejects_zero_cap_and_interval() {
        let mut config = valid();
        config.alerting.daily_cap = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDailyCap));

        let mut config = valid();
        config.alerting.schedule_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidScheduleInterval { value: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_short_lookback() {
        let mut config = valid();
        config.alerting.lookback_days = 7;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLookback { min: 8, value: 7, .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range_durations() {
        let mut config = valid();
        config.alerting.cooldown_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCooldown { value: u64::MAX, .. })
        ));
        // Helpers stay total even without validation
        assert_eq!(config.throttle_policy().cooldown, chrono::Duration::days(1));

        let mut config = valid();
        config.alerting.lookback_days = i64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLookback { max: 366, .. })
        ));
        assert_eq!(config.lookback(), chrono::Duration::days(366));

        let mut config = valid();
        config.alerting.schedule_interval_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidScheduleInterval { .. })
        ));
        assert_eq!(config.schedule_interval(), StdDuration::from_secs(86_400));
    }

    #[test]
    fn test_rejects_metric_problems() {
        let mut config = valid();
        config.metrics.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoMetrics));

        let mut config = valid();
        let dup = config.metrics[0].clone();
        config.metrics.push(dup);
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateMetric("views_per_user".to_string()))
        );

        let mut config = valid();
        config.metrics[0].dataset = "orders".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownDataset { dataset, .. }) if dataset == "orders"
        ));
    }

    #[test]
    fn test_rejects_missing_delivery_settings() {
        let mut config = valid();
        config.telegram.chat_ids.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoDestinations));

        let mut config = valid();
        config.telegram.bot_token = None;
        assert_eq!(config.validate(), Err(ConfigError::MissingBotToken));
    }

    #[test]
    fn test_rejects_bad_clickhouse_url() {
        let mut config = valid();
        config.clickhouse.url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "clickhouse", .. })
        ));
    }

    #[test]
    fn test_threshold_override() {
        let mut config = valid();
        config.metrics[1].threshold = Some(0.5);
        assert_eq!(config.threshold_for(&config.metrics[0]), 0.3);
        assert_eq!(config.threshold_for(&config.metrics[1]), 0.5);
        assert_eq!(config.metrics[0].display_name(), "Views per user");
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SentinelConfig = serde_json::from_str(
            r#"{
                "alerting": {"threshold": 0.25},
                "datasets": {"feed": "SELECT 1"},
                "metrics": [{"name": "ctr", "dataset": "feed"}],
                "telegram": {"dry_run": true}
            }"#,
        )
        .unwrap();

        assert_eq!(config.alerting.threshold, 0.25);
        assert_eq!(config.alerting.daily_cap, 6);
        assert_eq!(config.metrics[0].display_name(), "ctr");
        assert_eq!(config.dataset("feed").unwrap().sql, "SELECT 1");
        assert_eq!(config.validate(), Ok(()));
    }
}
