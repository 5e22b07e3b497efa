//! Tabular warehouse results
//!
//! A dataset query returns one row per time bucket with several metric
//! columns. [`SeriesFrame`] holds those rows and slices out a single
//! [`MetricSeries`] per column.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::SourceError;
use crate::models::{MetricSeries, Observation};

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Reserved column names
const TS_COLUMN: &str = "ts";
const DATE_COLUMN: &str = "date";
const TIME_LABEL_COLUMN: &str = "hm";

/// One time bucket of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRow {
    pub ts: NaiveDateTime,
    pub date: NaiveDate,
    pub time_label: String,
    pub values: HashMap<String, f64>,
}

/// Rows of one dataset, in the order the warehouse returned them
#[derive(Debug, Clone, Default)]
pub struct SeriesFrame {
    dataset: String,
    rows: Vec<FrameRow>,
}

impl SeriesFrame {
    pub fn new(dataset: impl Into<String>, rows: Vec<FrameRow>) -> Self {
        Self {
            dataset: dataset.into(),
            rows,
        }
    }

    /// Parse newline-delimited JSON objects (ClickHouse `JSONEachRow`).
    ///
    /// Numeric columns may be JSON numbers or quoted numbers; nulls and
    /// non-finite values are dropped so they show up as gaps.
    pub fn parse_json_each_row(dataset: impl Into<String>, body: &str) -> Result<Self, SourceError> {
        let dataset = dataset.into();
        let mut rows = Vec::new();

        for (idx, line) in body.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let parse_err = |message: String| SourceError::Parse {
                dataset: dataset.clone(),
                line: line_no,
                message,
            };

            let value: Value = serde_json::from_str(line).map_err(|e| parse_err(e.to_string()))?;
            let Value::Object(map) = value else {
                return Err(parse_err("row is not a JSON object".to_string()));
            };

            let ts = map
                .get(TS_COLUMN)
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
                .ok_or_else(|| parse_err(format!("missing or invalid '{}' column", TS_COLUMN)))?;

            let date = map
                .get(DATE_COLUMN)
                .and_then(Value::as_str)
                .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
                .unwrap_or_else(|| ts.date());

            let time_label = map
                .get(TIME_LABEL_COLUMN)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| ts.format(crate::models::TIME_LABEL_FORMAT).to_string());

            let values = map
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), TS_COLUMN | DATE_COLUMN | TIME_LABEL_COLUMN))
                .filter_map(|(key, value)| numeric(value).map(|v| (key.clone(), v)))
                .collect();

            rows.push(FrameRow {
                ts,
                date,
                time_label,
                values,
            });
        }

        Ok(Self { dataset, rows })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn rows(&self) -> &[FrameRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when at least one row carries a value for `column`
    pub fn has_column(&self, column: &str) -> bool {
        self.rows.iter().any(|r| r.values.contains_key(column))
    }

    /// Newest bucket of the dataset, across all columns
    pub fn last_ts(&self) -> Option<NaiveDateTime> {
        self.rows.iter().map(|r| r.ts).max()
    }

    /// Extract the series of one metric column.
    ///
    /// Rows without a value become gaps, but the series still covers up to
    /// the dataset's newest bucket so an empty trailing bucket is judged as
    /// missing rather than skipped.
    pub fn series(&self, metric: &str) -> Result<MetricSeries, SourceError> {
        if !self.has_column(metric) {
            return Err(SourceError::MissingColumn {
                dataset: self.dataset.clone(),
                column: metric.to_string(),
            });
        }

        let observations = self
            .rows
            .iter()
            .filter_map(|row| {
                row.values.get(metric).map(|&value| Observation {
                    timestamp: row.ts,
                    date: row.date,
                    time_label: row.time_label.clone(),
                    value,
                })
            })
            .collect();

        let series = MetricSeries::from_unsorted(metric, observations)?;
        Ok(match self.last_ts() {
            Some(last_ts) => series.with_observed_until(last_ts),
            None => series,
        })
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn numeric(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"ts":"2025-07-11 12:00:00","date":"2025-07-11","hm":"12:00","users_lenta":"812","views_per_user":10.0,"CTR":0.21}
{"ts":"2025-07-11 12:15:00","date":"2025-07-11","hm":"12:15","users_lenta":"790","views_per_user":null,"CTR":0.2}

{"ts":"2025-07-18 12:00:00","date":"2025-07-18","hm":"12:00","users_lenta":"901","views_per_user":"14.0","CTR":"nan"}
"#;

    #[test]
    fn test_parse_json_each_row() {
        let frame = SeriesFrame::parse_json_each_row("feed", BODY).unwrap();

        assert_eq!(frame.rows().len(), 3);
        assert_eq!(frame.dataset(), "feed");
        let first = &frame.rows()[0];
        assert_eq!(first.time_label, "12:00");
        assert_eq!(first.values["users_lenta"], 812.0);
        assert!(!frame.rows()[1].values.contains_key("views_per_user"));
    }

    #[test]
    fn test_series_skips_gaps() {
        let frame = SeriesFrame::parse_json_each_row("feed", BODY).unwrap();

        let views = frame.series("views_per_user").unwrap();
        assert_eq!(views.observations().len(), 2);
        assert_eq!(views.latest().value, 14.0);

        // "nan" parses but is not finite, so the last CTR bucket is a gap
        let ctr = frame.series("CTR").unwrap();
        assert_eq!(ctr.observations().len(), 2);
    }

    #[test]
    fn test_null_newest_bucket_cannot_evaluate() {
        let body = r#"{"ts":"2025-07-11 12:00:00","CTR":0.1}
{"ts":"2025-07-11 12:15:00","CTR":0.1}
{"ts":"2025-07-18 12:00:00","CTR":0.5}
{"ts":"2025-07-18 12:15:00","CTR":null}
"#;
        let frame = SeriesFrame::parse_json_each_row("feed", body).unwrap();
        let ctr = frame.series("CTR").unwrap();

        assert_eq!(ctr.latest().timestamp.format("%H:%M").to_string(), "12:00");
        assert_eq!(Some(ctr.current_timestamp()), frame.last_ts());

        let result = crate::anomaly::evaluate(&ctr, 0.3);
        assert!(!result.is_anomalous);
        assert_eq!(
            result.status,
            crate::anomaly::EvaluationStatus::CannotEvaluate(
                crate::anomaly::UnevaluableReason::MissingCurrent
            )
        );
    }

    #[test]
    fn test_missing_column() {
        let frame = SeriesFrame::parse_json_each_row("feed", BODY).unwrap();
        let err = frame.series("likes_per_user").unwrap_err();
        assert!(matches!(err, SourceError::MissingColumn { .. }));
    }

    #[test]
    fn test_derives_date_and_label_when_absent() {
        let frame =
            SeriesFrame::parse_json_each_row("x", r#"{"ts":"2025-07-18T09:30:00","m":1}"#).unwrap();
        let row = &frame.rows()[0];
        assert_eq!(row.time_label, "09:30");
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2025, 7, 18).unwrap());
    }

    #[test]
    fn test_invalid_row_reports_line() {
        let err = SeriesFrame::parse_json_each_row("feed", "{\"m\":1}\n").unwrap_err();
        match err {
            SourceError::Parse { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
    }
}
