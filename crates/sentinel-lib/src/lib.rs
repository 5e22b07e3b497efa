//! Sentinel library for week-over-week metric alerting
//!
//! This crate provides the core functionality for:
//! - Anomaly detection against the same time of day one week earlier
//! - Per-metric alert throttling (cooldown and daily cap)
//! - Alert orchestration and scheduling
//! - Series retrieval, chart rendering and Telegram delivery
//! - Health checks, observability and the HTTP API

pub mod anomaly;
pub mod api;
pub mod chart;
pub mod config;
pub mod health;
pub mod models;
pub mod notify;
pub mod observability;
pub mod orchestrator;
pub mod scheduler;
pub mod source;

pub use config::{ConfigError, SentinelConfig};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{SentinelMetrics, StructuredLogger};
pub use orchestrator::{AlertOrchestrator, CycleReport, MetricOutcome, MetricReport, MonitoredMetric};
pub use scheduler::{Clock, CycleScheduler, FixedClock, SystemClock};
