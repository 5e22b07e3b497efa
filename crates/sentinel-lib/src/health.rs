//! Sentinel health and readiness
//!
//! Component state is derived from every finished cycle: how many series
//! could be fetched, how many anomalies reached a destination and whether
//! the alert history could be read. Readiness is flipped by the daemon once
//! everything is wired up.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::orchestrator::CycleReport;

/// Parts of the sentinel that report health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Source,
    Notifier,
    Scheduler,
    ThrottleStore,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Source,
        Component::Notifier,
        Component::Scheduler,
        Component::ThrottleStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Source => "source",
            Component::Notifier => "notifier",
            Component::Scheduler => "scheduler",
            Component::ThrottleStore => "throttle_store",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Start of the cycle this state was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<NaiveDateTime>,
}

impl ComponentHealth {
    fn awaiting_first_cycle() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: Some("awaiting first cycle".to_string()),
            checked_at: None,
        }
    }

    fn healthy(checked_at: Option<NaiveDateTime>) -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            checked_at,
        }
    }

    /// Degraded when some of `total` attempts failed, unhealthy when all did
    fn from_failures(
        failed: usize,
        total: usize,
        what: &str,
        checked_at: Option<NaiveDateTime>,
    ) -> Self {
        if failed == 0 {
            return Self::healthy(checked_at);
        }
        let status = if failed >= total {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        Self {
            status,
            message: Some(format!("{} of {} {}", failed, total, what)),
            checked_at,
        }
    }
}

/// Body of `GET /healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<NaiveDateTime>,
}

/// Body of `GET /readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct HealthState {
    components: BTreeMap<Component, ComponentHealth>,
    last_cycle_at: Option<NaiveDateTime>,
    ready: bool,
}

/// Shared health view, cloned into the scheduler and the API
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        let components = Component::ALL
            .iter()
            .map(|&c| (c, ComponentHealth::awaiting_first_cycle()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(HealthState {
                components,
                last_cycle_at: None,
                ready: false,
            })),
        }
    }

    /// Derive component health from a finished cycle.
    ///
    /// `throttle_store` is the result of reading the alert history after the
    /// cycle; the store fails open, so a failure only degrades it.
    pub async fn observe_cycle(&self, report: &CycleReport, throttle_store: Result<(), String>) {
        let at = report.started_at;
        let delivered = report.emitted();
        let undelivered = report.delivery_failures();

        let source = ComponentHealth::from_failures(
            report.source_failures(),
            report.outcomes.len(),
            "metrics failed to load",
            at,
        );
        let notifier = ComponentHealth::from_failures(
            undelivered,
            delivered + undelivered,
            "alerts could not be delivered",
            at,
        );
        let store = match throttle_store {
            Ok(()) => ComponentHealth::healthy(at),
            Err(e) => ComponentHealth {
                status: ComponentStatus::Degraded,
                message: Some(e),
                checked_at: at,
            },
        };

        let mut state = self.state.write().await;
        state.components.insert(Component::Source, source);
        state.components.insert(Component::Notifier, notifier);
        state.components.insert(Component::ThrottleStore, store);
        state
            .components
            .insert(Component::Scheduler, ComponentHealth::healthy(at));
        state.last_cycle_at = at;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components: state.components.clone(),
            last_cycle_at: state.last_cycle_at,
        }
    }

    /// Ready once initialized and while no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = if !state.ready {
            Some("Sentinel not yet initialized".to_string())
        } else {
            state
                .components
                .iter()
                .find(|(_, h)| h.status == ComponentStatus::Unhealthy)
                .map(|(component, h)| match &h.message {
                    Some(message) => format!("{} unhealthy: {}", component, message),
                    None => format!("{} unhealthy", component),
                })
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
