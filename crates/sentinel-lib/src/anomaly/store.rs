//! Storage backends for alert throttle history
//!
//! The throttle decision logic only talks to [`ThrottleStore`]. The default
//! backend keeps records in memory for the lifetime of the process; the file
//! backend additionally mirrors every mutation to a JSON file so the daily
//! cap and cooldown survive restarts.

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// One emitted alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub metric_name: String,
    pub emitted_at: NaiveDateTime,
}

impl AlertRecord {
    pub fn new(metric_name: impl Into<String>, emitted_at: NaiveDateTime) -> Self {
        Self {
            metric_name: metric_name.into(),
            emitted_at,
        }
    }

    /// Calendar date the alert was emitted on
    pub fn date(&self) -> NaiveDate {
        self.emitted_at.date()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("throttle store I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("throttle store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Key-value storage for alert records, keyed by metric name
pub trait ThrottleStore: Send {
    /// All records currently held for a metric
    fn get_records(&self, metric: &str) -> Result<Vec<AlertRecord>, StoreError>;

    /// Append a record under its metric name
    fn append_record(&mut self, record: AlertRecord) -> Result<(), StoreError>;

    /// Drop every record, for every metric, not emitted on `day`.
    /// Returns the number of records removed.
    fn purge_other_days(&mut self, day: NaiveDate) -> Result<usize, StoreError>;

    /// Copy of the whole state, ordered by metric name
    fn snapshot(&self) -> Result<BTreeMap<String, Vec<AlertRecord>>, StoreError>;
}

/// Process-lifetime store
#[derive(Debug, Default, Clone)]
pub struct InMemoryThrottleStore {
    records: HashMap<String, Vec<AlertRecord>>,
}

impl InMemoryThrottleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_records(records: Vec<AlertRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store
                .records
                .entry(record.metric_name.clone())
                .or_default()
                .push(record);
        }
        store
    }

    fn all_records(&self) -> Vec<&AlertRecord> {
        self.records.values().flatten().collect()
    }
}

impl ThrottleStore for InMemoryThrottleStore {
    fn get_records(&self, metric: &str) -> Result<Vec<AlertRecord>, StoreError> {
        Ok(self.records.get(metric).cloned().unwrap_or_default())
    }

    fn append_record(&mut self, record: AlertRecord) -> Result<(), StoreError> {
        self.records
            .entry(record.metric_name.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn purge_other_days(&mut self, day: NaiveDate) -> Result<usize, StoreError> {
        let mut removed = 0;
        for records in self.records.values_mut() {
            let before = records.len();
            records.retain(|r| r.date() == day);
            removed += before - records.len();
        }
        self.records.retain(|_, records| !records.is_empty());
        Ok(removed)
    }

    fn snapshot(&self) -> Result<BTreeMap<String, Vec<AlertRecord>>, StoreError> {
        Ok(self
            .records
            .iter()
            .map(|(metric, records)| (metric.clone(), records.clone()))
            .collect())
    }
}

/// Store that keeps records in memory and rewrites a JSON file on every
/// mutation.
///
/// Memory stays authoritative: a failed write is reported but the record is
/// kept, so the running process still honours it.
#[derive(Debug)]
pub struct FileThrottleStore {
    path: PathBuf,
    inner: InMemoryThrottleStore,
}

impl FileThrottleStore {
    /// Open a store, loading existing records if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let inner = if path.exists() {
            let data = std::fs::read(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let records: Vec<AlertRecord> = serde_json::from_slice(&data)?;
            info!(path = %path.display(), records = records.len(), "Loaded throttle history");
            InMemoryThrottleStore::from_records(records)
        } else {
            InMemoryThrottleStore::new()
        };

        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
        }

        let records = self.inner.all_records();
        let json = serde_json::to_vec_pretty(&records)?;

        // Write atomically using temp file
        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(io_err(&temp_path))?;
        file.write_all(&json).map_err(io_err(&temp_path))?;
        file.sync_all().map_err(io_err(&temp_path))?;

        std::fs::rename(&temp_path, &self.path).map_err(io_err(&self.path))?;

        debug!(path = %self.path.display(), records = records.len(), "Throttle history flushed");
        Ok(())
    }
}

impl ThrottleStore for FileThrottleStore {
    fn get_records(&self, metric: &str) -> Result<Vec<AlertRecord>, StoreError> {
        self.inner.get_records(metric)
    }

    fn append_record(&mut self, record: AlertRecord) -> Result<(), StoreError> {
        self.inner.append_record(record)?;
        self.persist()
    }

    fn purge_other_days(&mut self, day: NaiveDate) -> Result<usize, StoreError> {
        let removed = self.inner.purge_other_days(day)?;
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    fn snapshot(&self) -> Result<BTreeMap<String, Vec<AlertRecord>>, StoreError> {
        self.inner.snapshot()
    }
}
