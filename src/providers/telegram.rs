use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::dispatcher::sanitize_message;
use crate::error::{Error, Result};
use crate::provider::{EventType, NotificationData, NotificationProvider, NotificationResult};
use crate::registry::ProviderHealth;
use crate::transport::HttpClient;

pub const IDENTIFIER: &str = "telegram";

const API_BASE: &str = "https://api.telegram.org";

/// Delivers notifications through a Telegram bot via `sendMessage`.
///
/// The bot token rides in the request path, so every error message leaving
/// this provider goes through the sanitizer.
pub struct TelegramProvider {
    bot_token: String,
    chat_id: String,
    api_base: String,
    http: HttpClient,
}

impl TelegramProvider {
    pub fn new(bot_token: String, chat_id: String, http: HttpClient) -> Self {
        Self {
            bot_token,
            chat_id,
            api_base: API_BASE.to_string(),
            http,
        }
    }

    pub fn from_env(http: HttpClient) -> Result<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| Error::EnvironmentMissing("TELEGRAM_BOT_TOKEN".to_string()))?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID")
            .map_err(|_| Error::EnvironmentMissing("TELEGRAM_CHAT_ID".to_string()))?;
        Ok(Self::new(bot_token, chat_id, http))
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    fn build_payload(&self, data: &NotificationData) -> Value {
        let text = match data.event_type {
            EventType::Started => format!(
                "<b>Mover started</b>\nTotal to move: {}",
                data.total_data
            ),
            EventType::Progress => format!(
                "<b>Mover progress: {:.1}%</b>\nMoved: {} of {}\nRemaining: {}\nRate: {}\nETA: {}",
                data.percent,
                data.moved_data,
                data.total_data,
                data.remaining_data,
                data.rate,
                super::format_eta(data.etc_timestamp),
            ),
            EventType::Completed => format!(
                "<b>Mover completed</b>\nMoved: {} ({:.1}%)",
                data.moved_data, data.percent
            ),
        };

        json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        })
    }
}

#[async_trait]
impl NotificationProvider for TelegramProvider {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn validate_config(&self) -> bool {
        // Bot tokens look like "<bot-id>:<secret>".
        let token_ok = self
            .bot_token
            .split_once(':')
            .is_some_and(|(id, secret)| {
                !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) && !secret.is_empty()
            });
        token_ok && !self.chat_id.trim().is_empty()
    }

    async fn health_check(&self) -> ProviderHealth {
        ProviderHealth::healthy()
    }

    async fn send_notification(&self, data: &NotificationData) -> Result<NotificationResult> {
        let payload = self.build_payload(data);
        let url = self.send_message_url();
        let start = Instant::now();
        match self.http.post_with_retry(&url, &payload).await {
            Ok(response) => {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                // Telegram reports some errors as 200 with ok=false.
                if response.body.contains("\"ok\":false") {
                    return Ok(NotificationResult::failed(
                        IDENTIFIER,
                        "Telegram API rejected the message",
                        elapsed_ms,
                        false,
                    ));
                }
                Ok(NotificationResult::delivered(IDENTIFIER, elapsed_ms))
            }
            Err(Error::MalformedUrl(_)) => Err(Error::ProviderValidation(IDENTIFIER.to_string())),
            Err(err) => Ok(NotificationResult::failed(
                IDENTIFIER,
                sanitize_message(&err.to_string()),
                start.elapsed().as_secs_f64() * 1000.0,
                err.is_transient(),
            )),
        }
    }
}
