//! HTTP API for health checks, Prometheus metrics and throttle inspection

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::anomaly::{AlertThrottle, ThrottleEntry, ThrottlePolicy};
use crate::health::{ComponentStatus, HealthRegistry};
use crate::observability::SentinelMetrics;
use crate::scheduler::{Clock, CycleScheduler, SystemClock};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: SentinelMetrics,
    pub throttle: Arc<AlertThrottle>,
    pub policy: ThrottlePolicy,
    /// Absent when cycles cannot be triggered over HTTP
    pub scheduler: Option<Arc<CycleScheduler>>,
    /// Decides which calendar day the throttle summary reports
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: SentinelMetrics,
        throttle: Arc<AlertThrottle>,
        policy: ThrottlePolicy,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            throttle,
            policy,
            scheduler: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Attach the scheduler; its clock also drives the throttle summary
    pub fn with_scheduler(mut self, scheduler: Arc<CycleScheduler>) -> Self {
        self.clock = scheduler.clock();
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Body of `GET /api/v1/throttle`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleStatus {
    pub cooldown_secs: i64,
    pub daily_cap: u32,
    pub metrics: Vec<ThrottleEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<NaiveDateTime>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Alerts sent today and last emission per metric
async fn throttle_status(State(state): State<Arc<AppState>>) -> Response {
    let today = state.clock.now().date();
    let metrics = match state.throttle.summary(today) {
        Ok(entries) => entries,
        Err(e) => {
            error!(error = %e, "Failed to read throttle state");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let last_cycle_at = match &state.scheduler {
        Some(scheduler) => scheduler.last_report().await.and_then(|r| r.started_at),
        None => None,
    };

    Json(ThrottleStatus {
        cooldown_secs: state.policy.cooldown.num_seconds(),
        daily_cap: state.policy.daily_cap,
        metrics,
        last_cycle_at,
    })
    .into_response()
}

/// Run a cycle now and return its report
async fn trigger_cycle(State(state): State<Arc<AppState>>) -> Response {
    let Some(scheduler) = &state.scheduler else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "scheduler not running" })),
        )
            .into_response();
    };

    info!("Cycle triggered over HTTP");
    Json(scheduler.run_once().await).into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/throttle", get(throttle_status))
        .route("/api/v1/cycles", post(trigger_cycle))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
