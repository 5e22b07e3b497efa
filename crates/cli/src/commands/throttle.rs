//! Throttle state of a running sentinel

use anyhow::Result;
use sentinel_lib::api::ThrottleStatus;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{format_timestamp, print_info, print_json, print_rows, OutputFormat};

#[derive(Tabled)]
struct ThrottleRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Alerts Today")]
    alerts: String,
    #[tabled(rename = "Last Alert")]
    last_alert: String,
}

pub async fn show_throttle(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: ThrottleStatus = client.get("api/v1/throttle").await?;

    if let OutputFormat::Json = format {
        print_json(&status);
        return Ok(());
    }

    let rows: Vec<ThrottleRow> = status
        .metrics
        .iter()
        .map(|entry| ThrottleRow {
            metric: entry.metric.clone(),
            alerts: format!("{}/{}", entry.alerts, status.daily_cap),
            last_alert: entry
                .last_emitted_at
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    print_rows(rows, &status, format);
    print_info(&format!(
        "Cooldown {}h, daily cap {}",
        status.cooldown_secs / 3600,
        status.daily_cap
    ));
    if let Some(last) = &status.last_cycle_at {
        print_info(&format!("Last cycle at {}", format_timestamp(last)));
    }

    Ok(())
}
