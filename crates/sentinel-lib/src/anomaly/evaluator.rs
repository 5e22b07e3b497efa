//! Week-over-week anomaly evaluation
//!
//! Compares the latest observation of a series with the observation taken
//! exactly seven calendar days earlier at the same time of day.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::models::MetricSeries;

/// Default relative deviation that counts as an anomaly (30%)
pub const DEFAULT_THRESHOLD: f64 = 0.3;

/// Distance between the current and the reference observation
pub const REFERENCE_LOOKBACK_DAYS: i64 = 7;

/// Slack applied to the threshold comparison so that ratios landing on the
/// threshold through float rounding (13.0 / 10.0 - 1.0 = 0.30000000000000004)
/// are not reported as anomalies.
const COMPARISON_TOLERANCE: f64 = 1e-9;

/// Why no anomaly judgement could be made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnevaluableReason {
    /// The newest bucket has no value for this metric
    MissingCurrent,
    /// No observation exactly one week before the latest one
    MissingReference,
    /// The reference value is zero, the ratio is undefined
    ZeroReference,
    /// The ratio is NaN or infinite
    NonFiniteChange,
}

impl std::fmt::Display for UnevaluableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnevaluableReason::MissingCurrent => write!(f, "missing_current"),
            UnevaluableReason::MissingReference => write!(f, "missing_reference"),
            UnevaluableReason::ZeroReference => write!(f, "zero_reference"),
            UnevaluableReason::NonFiniteChange => write!(f, "non_finite_change"),
        }
    }
}

/// Outcome class of an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum EvaluationStatus {
    Evaluated,
    CannotEvaluate(UnevaluableReason),
}

/// Direction of a deviation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Increase => write!(f, "increase"),
            Direction::Decrease => write!(f, "decrease"),
        }
    }
}

/// Result of one evaluation.
///
/// `current_value`, `relative_change` and `reference_value` are either all
/// present (status `Evaluated`) or all absent (status `CannotEvaluate`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub is_anomalous: bool,
    pub current_value: Option<f64>,
    pub relative_change: Option<f64>,
    pub current_timestamp: NaiveDateTime,
    pub reference_value: Option<f64>,
    pub reference_timestamp: NaiveDateTime,
    pub status: EvaluationStatus,
}

impl EvaluationResult {
    fn cannot_evaluate(
        current_timestamp: NaiveDateTime,
        reference_timestamp: NaiveDateTime,
        reason: UnevaluableReason,
    ) -> Self {
        Self {
            is_anomalous: false,
            current_value: None,
            relative_change: None,
            current_timestamp,
            reference_value: None,
            reference_timestamp,
            status: EvaluationStatus::CannotEvaluate(reason),
        }
    }

    /// True when a judgement (anomalous or not) was made
    pub fn is_evaluated(&self) -> bool {
        self.status == EvaluationStatus::Evaluated
    }

    /// Direction of the change, if the series could be evaluated
    pub fn direction(&self) -> Option<Direction> {
        match (self.current_value, self.reference_value) {
            (Some(current), Some(reference)) if current > reference => Some(Direction::Increase),
            (Some(_), Some(_)) => Some(Direction::Decrease),
            _ => None,
        }
    }
}

/// Detects week-over-week deviations above a relative threshold
#[derive(Debug, Clone, Copy)]
pub struct WeekOverWeekEvaluator {
    /// Relative deviation (fraction, e.g. 0.3) that must be exceeded
    pub threshold: f64,
}

impl WeekOverWeekEvaluator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn evaluate(&self, series: &MetricSeries) -> EvaluationResult {
        evaluate(series, self.threshold)
    }
}

impl Default for WeekOverWeekEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

/// Evaluate the newest bucket of `series` against the one exactly seven
/// days earlier.
///
/// The newest bucket is [`MetricSeries::current_timestamp`]; when it has no
/// value the result is `CannotEvaluate(MissingCurrent)`, older buckets are
/// never judged in its place. A zero reference value is reported as
/// `CannotEvaluate(ZeroReference)` rather than producing an infinite change.
///
/// The series is anomalous when `|relative_change| > threshold + 1e-9`. The
/// slack keeps ratios that land on the threshold through float rounding
/// (13 / 10 - 1 at 0.3) from alerting; changes within 1e-9 above the
/// threshold are treated as equal to it.
pub fn evaluate(series: &MetricSeries, threshold: f64) -> EvaluationResult {
    let current_timestamp = series.current_timestamp();
    let reference_timestamp = current_timestamp - Duration::days(REFERENCE_LOOKBACK_DAYS);

    let Some(current) = series.at(current_timestamp) else {
        return EvaluationResult::cannot_evaluate(
            current_timestamp,
            reference_timestamp,
            UnevaluableReason::MissingCurrent,
        );
    };

    let Some(reference) = series.at(reference_timestamp) else {
        return EvaluationResult::cannot_evaluate(
            current_timestamp,
            reference_timestamp,
            UnevaluableReason::MissingReference,
        );
    };

    if reference.value == 0.0 {
        return EvaluationResult::cannot_evaluate(
            current_timestamp,
            reference_timestamp,
            UnevaluableReason::ZeroReference,
        );
    }

    let relative_change = current.value / reference.value - 1.0;
    if !relative_change.is_finite() {
        return EvaluationResult::cannot_evaluate(
            current_timestamp,
            reference_timestamp,
            UnevaluableReason::NonFiniteChange,
        );
    }

    EvaluationResult {
        is_anomalous: relative_change.abs() - threshold > COMPARISON_TOLERANCE,
        current_value: Some(current.value),
        relative_change: Some(relative_change),
        current_timestamp,
        reference_value: Some(reference.value),
        reference_timestamp,
        status: EvaluationStatus::Evaluated,
    }
}
