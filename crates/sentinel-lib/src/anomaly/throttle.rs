//! Per-metric alert throttling
//!
//! An anomaly may only turn into a notification when the metric has not yet
//! hit its daily cap and its cooldown since the last emitted alert has
//! elapsed. History older than the current calendar day is purged on every
//! check.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::store::{AlertRecord, InMemoryThrottleStore, StoreError, ThrottleStore};

/// Default minimum time between two alerts for one metric (4 hours)
pub const DEFAULT_COOLDOWN_SECS: i64 = 4 * 60 * 60;

/// Default maximum number of alerts per metric per calendar day
pub const DEFAULT_DAILY_CAP: u32 = 6;

/// Cooldown and daily cap applied to every metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub cooldown: Duration,
    pub daily_cap: u32,
}

impl ThrottlePolicy {
    pub fn new(cooldown: Duration, daily_cap: u32) -> Self {
        Self {
            cooldown,
            daily_cap,
        }
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::seconds(DEFAULT_COOLDOWN_SECS),
            daily_cap: DEFAULT_DAILY_CAP,
        }
    }
}

/// Why an anomaly was not emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    DailyCap,
    Cooldown,
}

impl SuppressionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionReason::DailyCap => "daily_cap",
            SuppressionReason::Cooldown => "cooldown",
        }
    }
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the throttle gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allow,
    CapReached {
        sent_today: usize,
        cap: u32,
    },
    Cooldown {
        last_emitted_at: NaiveDateTime,
        remaining: Duration,
    },
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allow)
    }

    pub fn suppression_reason(&self) -> Option<SuppressionReason> {
        match self {
            ThrottleDecision::Allow => None,
            ThrottleDecision::CapReached { .. } => Some(SuppressionReason::DailyCap),
            ThrottleDecision::Cooldown { .. } => Some(SuppressionReason::Cooldown),
        }
    }
}

/// Per-metric view of the throttle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleEntry {
    pub metric: String,
    pub alerts: usize,
    pub last_emitted_at: Option<NaiveDateTime>,
}

/// Alert throttle owning the alert history.
///
/// `check`/`may_emit` and `record` are separate calls. Callers that evaluate
/// the same metric from several tasks hold [`AlertThrottle::lock_metric`]
/// across gate, delivery and record.
pub struct AlertThrottle {
    store: Mutex<Box<dyn ThrottleStore>>,
    metric_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl AlertThrottle {
    /// Throttle backed by process memory only
    pub fn in_memory() -> Self {
        Self::with_store(Box::new(InMemoryThrottleStore::new()))
    }

    pub fn with_store(store: Box<dyn ThrottleStore>) -> Self {
        Self {
            store: Mutex::new(store),
            metric_locks: DashMap::new(),
        }
    }

    fn store(&self) -> MutexGuard<'_, Box<dyn ThrottleStore>> {
        // The store holds plain data; a panic elsewhere leaves it usable
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serialize gate-and-record sequences for one metric name
    pub async fn lock_metric(&self, metric: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .metric_locks
            .entry(metric.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Run the throttle gate: purge, then daily cap, then cooldown
    pub fn check(
        &self,
        metric: &str,
        now: NaiveDateTime,
        policy: &ThrottlePolicy,
    ) -> Result<ThrottleDecision, StoreError> {
        let mut store = self.store();

        let today = now.date();
        let purged = store.purge_other_days(today)?;
        if purged > 0 {
            debug!(purged = purged, today = %today, "Purged alert history from previous days");
        }

        let records = store.get_records(metric)?;
        let sent_today = records.iter().filter(|r| r.date() == today).count();

        if sent_today >= policy.daily_cap as usize {
            return Ok(ThrottleDecision::CapReached {
                sent_today,
                cap: policy.daily_cap,
            });
        }

        if let Some(last) = records.iter().map(|r| r.emitted_at).max() {
            let elapsed = now - last;
            if elapsed < policy.cooldown {
                return Ok(ThrottleDecision::Cooldown {
                    last_emitted_at: last,
                    remaining: policy.cooldown - elapsed,
                });
            }
        }

        Ok(ThrottleDecision::Allow)
    }

    /// Boolean form of [`AlertThrottle::check`].
    ///
    /// A store failure allows the alert: an extra notification is preferred
    /// over a silently missed one.
    pub fn may_emit(
        &self,
        metric: &str,
        now: NaiveDateTime,
        cooldown: Duration,
        daily_cap: u32,
    ) -> bool {
        match self.check(metric, now, &ThrottlePolicy::new(cooldown, daily_cap)) {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                warn!(metric = %metric, error = %e, "Throttle check failed, allowing alert");
                true
            }
        }
    }

    /// Record a successfully delivered alert
    pub fn record(&self, metric: &str, now: NaiveDateTime) -> Result<(), StoreError> {
        self.store().append_record(AlertRecord::new(metric, now))
    }

    /// Raw alert history
    pub fn snapshot(&self) -> Result<BTreeMap<String, Vec<AlertRecord>>, StoreError> {
        self.store().snapshot()
    }

    /// Alerts sent on `today` and the last of them, per metric.
    ///
    /// Read-only: records from other days are skipped, not purged, so
    /// metrics that have not alerted today are left out.
    pub fn summary(&self, today: NaiveDate) -> Result<Vec<ThrottleEntry>, StoreError> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter_map(|(metric, records)| {
                let emitted: Vec<NaiveDateTime> = records
                    .iter()
                    .filter(|r| r.date() == today)
                    .map(|r| r.emitted_at)
                    .collect();
                let last_emitted_at = emitted.iter().max().copied()?;
                Some(ThrottleEntry {
                    metric,
                    alerts: emitted.len(),
                    last_emitted_at: Some(last_emitted_at),
                })
            })
            .collect())
    }
}

impl Default for AlertThrottle {
    fn default() -> Self {
        Self::in_memory()
    }
}
