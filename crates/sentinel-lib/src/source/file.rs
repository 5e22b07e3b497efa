//! File-backed series source

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Duration;

use super::{SeriesFrame, SeriesProvider, SourceError};
use crate::models::MetricSeries;

/// Reads a `JSONEachRow` export from disk on every fetch.
///
/// The whole file is used; `lookback` is not applied.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load_frame(&self) -> Result<SeriesFrame, SourceError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;

        let dataset = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        SeriesFrame::parse_json_each_row(dataset, &body)
    }
}

#[async_trait]
impl SeriesProvider for FileSource {
    async fn fetch_series(&self, metric: &str, _lookback: Duration) -> Result<MetricSeries, SourceError> {
        self.load_frame().await?.series(metric)
    }
}
