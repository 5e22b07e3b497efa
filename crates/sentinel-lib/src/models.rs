//! Core data models for metric sentinel

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Format of the time-of-day label attached to every observation
pub const TIME_LABEL_FORMAT: &str = "%H:%M";

/// A single point of a metric time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub date: NaiveDate,
    /// Time-of-day bucket label, e.g. "14:45"
    pub time_label: String,
    pub value: f64,
}

impl Observation {
    /// Build an observation, deriving the calendar date and time label
    /// from the timestamp
    pub fn new(timestamp: NaiveDateTime, value: f64) -> Self {
        Self {
            timestamp,
            date: timestamp.date(),
            time_label: timestamp.format(TIME_LABEL_FORMAT).to_string(),
            value,
        }
    }
}

/// Errors raised when building a [`MetricSeries`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("series for metric '{metric}' has no observations")]
    Empty { metric: String },

    #[error("series for metric '{metric}' is not sorted: {next} follows {previous}")]
    OutOfOrder {
        metric: String,
        previous: NaiveDateTime,
        next: NaiveDateTime,
    },

    #[error("series for metric '{metric}' has duplicate timestamp {timestamp}")]
    DuplicateTimestamp {
        metric: String,
        timestamp: NaiveDateTime,
    },
}

/// Ordered observations of one named metric.
///
/// Timestamps are strictly increasing and the series always holds at least
/// one observation. `observed_until` is the newest bucket the source
/// covered; it is later than the last observation when trailing buckets
/// had no value for this metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSeries {
    metric: String,
    observations: Vec<Observation>,
    observed_until: NaiveDateTime,
}

impl MetricSeries {
    /// Create a series from observations already sorted by timestamp
    pub fn new(
        metric: impl Into<String>,
        observations: Vec<Observation>,
    ) -> Result<Self, SeriesError> {
        let metric = metric.into();

        if observations.is_empty() {
            return Err(SeriesError::Empty { metric });
        }

        for pair in observations.windows(2) {
            let (previous, next) = (pair[0].timestamp, pair[1].timestamp);
            if next == previous {
                return Err(SeriesError::DuplicateTimestamp {
                    metric,
                    timestamp: next,
                });
            }
            if next < previous {
                return Err(SeriesError::OutOfOrder {
                    metric,
                    previous,
                    next,
                });
            }
        }

        let observed_until = observations[observations.len() - 1].timestamp;
        Ok(Self {
            metric,
            observations,
            observed_until,
        })
    }

    /// Extend the covered range to `timestamp`, the newest bucket of the
    /// dataset this series was cut from. Earlier timestamps are ignored.
    pub fn with_observed_until(mut self, timestamp: NaiveDateTime) -> Self {
        self.observed_until = self.observed_until.max(timestamp);
        self
    }

    /// Create a series from observations in any order
    pub fn from_unsorted(
        metric: impl Into<String>,
        mut observations: Vec<Observation>,
    ) -> Result<Self, SeriesError> {
        observations.sort_by_key(|o| o.timestamp);
        Self::new(metric, observations)
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// The observation with the maximum timestamp
    pub fn latest(&self) -> &Observation {
        // Non-empty by construction
        &self.observations[self.observations.len() - 1]
    }

    /// Timestamp of the bucket under evaluation: the newest covered bucket,
    /// whether or not it carries a value
    pub fn current_timestamp(&self) -> NaiveDateTime {
        self.observed_until
    }

    /// Exact-timestamp lookup, no nearest-neighbour matching
    pub fn at(&self, timestamp: NaiveDateTime) -> Option<&Observation> {
        self.observations
            .binary_search_by_key(&timestamp, |o| o.timestamp)
            .ok()
            .map(|idx| &self.observations[idx])
    }

    /// All observations that fall on the given calendar date
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(move |o| o.date == date)
    }
}
