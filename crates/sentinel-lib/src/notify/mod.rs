//! Alert delivery
//!
//! This module provides:
//! - The notification payload and its message rendering
//! - The [`Notifier`] seam used by the orchestrator
//! - A Telegram Bot API notifier and a log-only notifier for dry runs

mod dry_run;
mod message;
mod telegram;

pub use dry_run::LogNotifier;
pub use message::Notification;
pub use telegram::{TelegramNotifier, DEFAULT_TELEGRAM_API};

use async_trait::async_trait;
use thiserror::Error;

use crate::chart::Chart;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("delivery rejected with status {status}: {description}")]
    Rejected { status: u16, description: String },
}

/// Sends text and images to a destination (chat, channel, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logs
    fn name(&self) -> &str;

    async fn send_text(&self, destination: &str, text: &str) -> Result<(), DeliveryError>;

    async fn send_image(&self, destination: &str, chart: &Chart) -> Result<(), DeliveryError>;
}
