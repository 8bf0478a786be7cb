use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::dispatcher::sanitize_message;
use crate::error::{Error, Result};
use crate::provider::{EventType, NotificationData, NotificationProvider, NotificationResult};
use crate::registry::ProviderHealth;
use crate::transport::HttpClient;

pub const IDENTIFIER: &str = "discord";

const COLOR_STARTED: u32 = 0x3498db;
const COLOR_PROGRESS: u32 = 0xf1c40f;
const COLOR_COMPLETED: u32 = 0x2ecc71;

/// Delivers notifications to a Discord webhook as a single embed.
pub struct DiscordProvider {
    webhook_url: String,
    http: HttpClient,
}

impl DiscordProvider {
    pub fn new(webhook_url: String, http: HttpClient) -> Self {
        Self { webhook_url, http }
    }

    pub fn from_env(http: HttpClient) -> Result<Self> {
        let webhook_url = std::env::var("DISCORD_WEBHOOK_URL")
            .map_err(|_| Error::EnvironmentMissing("DISCORD_WEBHOOK_URL".to_string()))?;
        Ok(Self::new(webhook_url, http))
    }

    fn build_payload(&self, data: &NotificationData) -> Value {
        let (title, color) = match data.event_type {
            EventType::Started => ("Mover started", COLOR_STARTED),
            EventType::Progress => ("Mover progress", COLOR_PROGRESS),
            EventType::Completed => ("Mover completed", COLOR_COMPLETED),
        };

        json!({
            "embeds": [{
                "title": title,
                "description": format!("**{:.1}%** complete", data.percent),
                "color": color,
                "fields": [
                    { "name": "Moved", "value": data.moved_data, "inline": true },
                    { "name": "Remaining", "value": data.remaining_data, "inline": true },
                    { "name": "Total", "value": data.total_data, "inline": true },
                    { "name": "Rate", "value": data.rate, "inline": true },
                    { "name": "ETA", "value": super::format_eta(data.etc_timestamp), "inline": true },
                ],
                "footer": { "text": format!("cycle {}", data.correlation_id) },
            }]
        })
    }
}

#[async_trait]
impl NotificationProvider for DiscordProvider {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn validate_config(&self) -> bool {
        let Ok(url) = reqwest::Url::parse(&self.webhook_url) else {
            return false;
        };
        url.scheme() == "https"
            && url
                .host_str()
                .is_some_and(|host| host == "discord.com" || host.ends_with(".discord.com"))
            && url.path().starts_with("/api/webhooks/")
    }

    async fn health_check(&self) -> ProviderHealth {
        ProviderHealth::healthy()
    }

    async fn send_notification(&self, data: &NotificationData) -> Result<NotificationResult> {
        let payload = self.build_payload(data);
        let start = Instant::now();
        match self.http.post_with_retry(&self.webhook_url, &payload).await {
            Ok(_) => Ok(NotificationResult::delivered(
                IDENTIFIER,
                start.elapsed().as_secs_f64() * 1000.0,
            )),
            // A webhook URL the transport cannot even parse is a
            // configuration problem, not a delivery failure.
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
