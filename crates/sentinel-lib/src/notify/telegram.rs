//! Telegram Bot API notifier

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{DeliveryError, Notifier};
use crate::chart::Chart;

pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Delivers alerts to Telegram chats
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        Self::with_api_base(bot_token, DEFAULT_TELEGRAM_API, timeout)
    }

    /// Use a custom Bot API server (self-hosted server or tests)
    pub fn with_api_base(
        bot_token: impl Into<String>,
        api_base: &str,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn check(response: Response) -> Result<(), DeliveryError> {
        let status = response.status();
        let body = response.text().await?;

        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();
        match parsed {
            Some(api) if status.is_success() && api.ok => Ok(()),
            Some(api) => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                description: api.description.unwrap_or_else(|| "unknown error".to_string()),
            }),
            None => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                description: body.trim().to_string(),
            }),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, destination: &str, text: &str) -> Result<(), DeliveryError> {
        let payload = json!({
            "chat_id": destination,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await?;

        Self::check(response).await?;
        debug!(chat_id = %destination, "Telegram message sent");
        Ok(())
    }

    /// Raster images go out as photos so they show inline, anything else
    /// as a document
    async fn send_image(&self, destination: &str, chart: &Chart) -> Result<(), DeliveryError> {
        let (method, field) = match chart.mime_type.as_str() {
            "image/png" | "image/jpeg" => ("sendPhoto", "photo"),
            _ => ("sendDocument", "document"),
        };

        let part = Part::bytes(chart.bytes.clone())
            .file_name(chart.file_name.clone())
            .mime_str(&chart.mime_type)?;
        let form = Form::new()
            .text("chat_id", destination.to_string())
            .part(field, part);

        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await?;

        Self::check(response).await?;
        debug!(chat_id = %destination, file = %chart.file_name, method = method, "Telegram chart sent");
        Ok(())
    }
}
