//! Offline evaluation of an exported dataset

use anyhow::{Context, Result};
use colored::Colorize;
use sentinel_lib::anomaly::{evaluate, EvaluationResult, EvaluationStatus};
use sentinel_lib::source::{FileSource, SeriesProvider};
use std::path::Path;

use crate::output::{format_change, format_timestamp, print_json, print_warning, OutputFormat};

fn value_or_dash(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "-".to_string())
}

fn print_result(metric: &str, threshold: f64, result: &EvaluationResult) {
    println!("{}", "Week-over-week Evaluation".bold());
    println!("{}", "=".repeat(50));
    println!("Metric:              {}", metric.cyan());
    println!("Threshold:           {}", format_change(threshold));
    println!(
        "Current:             {} at {}",
        value_or_dash(result.current_value),
        format_timestamp(&result.current_timestamp)
    );
    println!(
        "Reference:           {} at {}",
        value_or_dash(result.reference_value),
        format_timestamp(&result.reference_timestamp)
    );
    println!(
        "Change:              {}",
        result
            .relative_change
            .map(format_change)
            .unwrap_or_else(|| "-".to_string())
    );
    println!();

    match result.status {
        EvaluationStatus::CannotEvaluate(reason) => {
            print_warning(&format!("Cannot evaluate: {}", reason));
        }
        EvaluationStatus::Evaluated if result.is_anomalous => {
            println!("{}", "ANOMALY".red().bold());
        }
        EvaluationStatus::Evaluated => {
            println!("{}", "normal".green());
        }
    }
}

pub async fn evaluate_file(
    file: &Path,
    metric: &str,
    threshold: f64,
    format: OutputFormat,
) -> Result<()> {
    if !(threshold.is_finite() && threshold > 0.0) {
        anyhow::bail!("threshold must be finite and greater than 0, got {}", threshold);
    }

    let source = FileSource::new(file);
    let series = source
        .fetch_series(metric, chrono::Duration::zero())
        .await
        .with_context(|| format!("Failed to load '{}' from {}", metric, file.display()))?;

    let result = evaluate(&series, threshold);

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => print_result(metric, threshold, &result),
    }

    Ok(())
}
