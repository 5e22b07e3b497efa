//! Manually triggered evaluation cycles

use anyhow::Result;
use sentinel_lib::{CycleReport, MetricOutcome};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_change, print_json, print_rows, print_success, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn describe(outcome: &MetricOutcome) -> (String, String) {
    match outcome {
        MetricOutcome::SourceFailed { error } => ("-".to_string(), error.clone()),
        MetricOutcome::CannotEvaluate { reason } => ("-".to_string(), reason.to_string()),
        MetricOutcome::Normal { relative_change } => (format_change(*relative_change), String::new()),
        MetricOutcome::Suppressed {
            reason,
            relative_change,
        } => (format_change(*relative_change), reason.to_string()),
        MetricOutcome::Emitted {
            relative_change,
            destinations,
        } => (
            format_change(*relative_change),
            format!("sent to {} destination(s)", destinations),
        ),
        MetricOutcome::DeliveryFailed { error } => ("-".to_string(), error.clone()),
    }
}

pub async fn trigger_cycle(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: CycleReport = client.post("api/v1/cycles").await?;

    if let OutputFormat::Json = format {
        print_json(&report);
        return Ok(());
    }

    let rows: Vec<OutcomeRow> = report
        .outcomes
        .iter()
        .map(|r| {
            let (change, detail) = describe(&r.outcome);
            OutcomeRow {
                metric: r.metric.clone(),
                outcome: color_status(r.outcome.label()),
                change,
                detail,
            }
        })
        .collect();

    print_rows(rows, &report, format);

    if report.failed() > 0 {
        print_warning(&format!("{} metric(s) failed", report.failed()));
    }
    print_success(&format!(
        "Cycle complete: {} emitted, {} suppressed",
        report.emitted(),
        report.suppressed()
    ));

    Ok(())
}
