//! Notifier that only logs (dry-run mode)

use async_trait::async_trait;
use tracing::info;

use super::{DeliveryError, Notifier};
use crate::chart::Chart;

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_text(&self, destination: &str, text: &str) -> Result<(), DeliveryError> {
        info!(
            event = "notification_dry_run",
            destination = %destination,
            text = %text,
            "Notification not sent (dry run)"
        );
        Ok(())
    }

    async fn send_image(&self, destination: &str, chart: &Chart) -> Result<(), DeliveryError> {
        info!(
            event = "notification_dry_run",
            destination = %destination,
            file = %chart.file_name,
            bytes = chart.bytes.len(),
            "Chart not sent (dry run)"
        );
        Ok(())
    }
}
