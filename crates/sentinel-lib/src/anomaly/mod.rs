//! Anomaly detection and alert throttling
//!
//! This module provides:
//! - Week-over-week deviation detection for a metric series
//! - Per-metric alert throttling (cooldown + daily cap)
//! - Pluggable storage for throttle history

mod evaluator;
mod store;
mod throttle;

pub use evaluator::{
    evaluate, Direction, EvaluationResult, EvaluationStatus, UnevaluableReason,
    WeekOverWeekEvaluator, DEFAULT_THRESHOLD, REFERENCE_LOOKBACK_DAYS,
};
pub use store::{AlertRecord, FileThrottleStore, InMemoryThrottleStore, StoreError, ThrottleStore};
pub use throttle::{
    AlertThrottle, SuppressionReason, ThrottleDecision, ThrottleEntry, ThrottlePolicy,
    DEFAULT_COOLDOWN_SECS, DEFAULT_DAILY_CAP,
};
