//! Output formatting utilities

use chrono::NaiveDateTime;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table of rows, or the underlying value as JSON
pub fn print_rows<R: Tabled, V: Serialize + ?Sized>(rows: Vec<R>, value: &V, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(value),
    }
}

pub fn print_json<V: Serialize + ?Sized>(value: &V) {
    if let Ok(json) = serde_json::to_string_pretty(value) {
        println!("{}", json);
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a relative change as a signed percentage
pub fn format_change(change: f64) -> String {
    format!("{:+.1}%", change * 100.0)
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "ready" | "emitted" | "normal" => status.green().to_string(),
        "degraded" | "suppressed" | "cannot_evaluate" => status.yellow().to_string(),
        "unhealthy" | "not ready" | "source_failed" | "delivery_failed" => {
            status.red().to_string()
        }
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_change() {
        assert_eq!(format_change(0.4), "+40.0%");
        assert_eq!(format_change(-0.255), "-25.5%");
        assert_eq!(format_change(0.0), "+0.0%");
    }

    #[test]
    fn test_format_timestamp() {
        let ts = NaiveDateTime::parse_from_str("2025-07-18 12:05:41", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(format_timestamp(&ts), "2025-07-18 12:05");
    }
}
