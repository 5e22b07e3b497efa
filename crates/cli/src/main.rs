//! Metric Sentinel CLI
//!
//! A command-line tool for inspecting a running sentinel, triggering
//! evaluation cycles, and evaluating exported series offline.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cycles, evaluate, status, throttle};
use std::path::PathBuf;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Metric Sentinel CLI
#[derive(Parser)]
#[command(name = "sentinelctl")]
#[command(author, version, about = "CLI for Metric Sentinel", long_about = None)]
pub struct Cli {
    /// Sentinel API URL (can also be set via SENTINEL_API_URL env var)
    #[arg(long, env = "SENTINEL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show component health and readiness of the sentinel
    Status,

    /// Show alerts sent today and the last emission per metric
    Throttle,

    /// Run an evaluation cycle now
    Trigger,

    /// Evaluate a metric from a JSONEachRow export without a running sentinel
    Evaluate {
        /// Path to the exported dataset (one JSON object per line)
        #[arg(long)]
        file: PathBuf,

        /// Metric column to evaluate
        #[arg(long, short)]
        metric: String,

        /// Relative change above which the latest value is anomalous
        #[arg(long, default_value_t = sentinel_lib::anomaly::DEFAULT_THRESHOLD)]
        threshold: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::Config::load()?;

    let format = cli
        .format
        .or_else(|| settings.format())
        .unwrap_or_default();
    let api_url = cli
        .api_url
        .or(settings.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    match cli.command {
        Commands::Status => {
            let client = client::ApiClient::new(&api_url)?;
            status::show_status(&client, format).await?;
        }
        Commands::Throttle => {
            let client = client::ApiClient::new(&api_url)?;
            throttle::show_throttle(&client, format).await?;
        }
        Commands::Trigger => {
            let client = client::ApiClient::new(&api_url)?;
            cycles::trigger_cycle(&client, format).await?;
        }
        Commands::Evaluate {
            file,
            metric,
            threshold,
        } => {
            evaluate::evaluate_file(&file, &metric, threshold, format).await?;
        }
    }

    Ok(())
}
