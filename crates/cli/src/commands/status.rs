//! Sentinel health and readiness

use anyhow::Result;
use colored::Colorize;
use sentinel_lib::{HealthResponse, ReadinessResponse};
use serde_json::json;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_timestamp, print_info, print_json, print_rows, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Checked")]
    checked: String,
}

fn status_name<T: serde::Serialize>(status: &T) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (_, HealthResponse) = client.probe("healthz").await?;
    let (_, readiness): (_, ReadinessResponse) = client.probe("readyz").await?;

    if let OutputFormat::Json = format {
        print_json(&json!({ "health": health, "readiness": readiness }));
        return Ok(());
    }

    let overall = status_name(&health.status);
    println!("{}", "Sentinel Status".bold());
    println!("{}", "=".repeat(50));
    println!("Health:    {}", color_status(&overall));
    if readiness.ready {
        println!("Readiness: {}", color_status("ready"));
    } else {
        println!("Readiness: {}", color_status("not ready"));
    }
    if let Some(reason) = &readiness.reason {
        print_warning(reason);
    }
    println!();

    // Keyed by component, so already in a stable order
    let rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(component, h)| ComponentRow {
            component: component.to_string(),
            status: color_status(&status_name(&h.status)),
            message: h.message.clone().unwrap_or_else(|| "-".to_string()),
            checked: h
                .checked_at
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    print_rows(rows, &health, format);
    match &health.last_cycle_at {
        Some(at) => print_info(&format!("Last cycle at {}", format_timestamp(at))),
        None => print_info("No cycle has run yet"),
    }
    Ok(())
}
