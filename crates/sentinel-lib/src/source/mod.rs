//! Time-series retrieval
//!
//! This module provides:
//! - The [`SeriesProvider`] seam the orchestrator pulls metric series from
//! - A ClickHouse HTTP source with per-dataset frame caching
//! - A file source reading the same `JSONEachRow` format
//! - Built-in dataset queries for feed and messenger activity

mod clickhouse;
mod file;
mod frame;
pub mod presets;

pub use clickhouse::{ClickHouseClient, ClickHouseConfig, ClickHouseSource};
pub use file::FileSource;
pub use frame::{FrameRow, SeriesFrame};

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

use crate::models::{MetricSeries, SeriesError};

/// Placeholder substituted with the lookback window in dataset SQL
pub const LOOKBACK_PLACEHOLDER: &str = "{lookback_days}";

/// Default history pulled per cycle; covers the reference week with margin
pub const DEFAULT_LOOKBACK_DAYS: i64 = 14;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("warehouse request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("warehouse returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid warehouse URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to parse dataset '{dataset}' line {line}: {message}")]
    Parse {
        dataset: String,
        line: usize,
        message: String,
    },

    #[error("dataset '{dataset}' has no column '{column}'")]
    MissingColumn { dataset: String, column: String },

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error("failed to read series file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Produces the series of a metric covering at least `lookback`
#[async_trait]
pub trait SeriesProvider: Send + Sync {
    async fn fetch_series(&self, metric: &str, lookback: Duration) -> Result<MetricSeries, SourceError>;
}

/// A named warehouse query producing several metric columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub name: String,
    pub sql: String,
}

impl Dataset {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }

    /// SQL with the lookback window substituted
    pub fn render(&self, lookback: Duration) -> String {
        let days = lookback.num_days().max(1);
        self.sql.replace(LOOKBACK_PLACEHOLDER, &days.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_render_substitutes_lookback() {
        let dataset = Dataset::new("feed", "SELECT 1 WHERE time >= today() - {lookback_days}");
        assert_eq!(
            dataset.render(Duration::days(14)),
            "SELECT 1 WHERE time >= today() - 14"
        );
        // Sub-day windows still look back one full day
        assert!(dataset.render(Duration::hours(3)).ends_with("- 1"));
    }
}
