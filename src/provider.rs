use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::registry::ProviderHealth;

/// Lifecycle events a notification can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Started,
    Progress,
    Completed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to every provider.
///
/// Size and rate fields are pre-formatted human strings; providers need no
/// numeric logic. The correlation id ties all notifications of one mover
/// cycle together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationData {
    pub event_type: EventType,
    pub percent: f64,
    pub remaining_data: String,
    pub moved_data: String,
    pub total_data: String,
    pub rate: String,
    pub etc_timestamp: Option<DateTime<Utc>>,
    pub correlation_id: String,
}

/// Outcome of one delivery attempt to one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationResult {
    pub success: bool,
    pub provider: String,
    pub error_message: Option<String>,
    pub delivery_time_ms: f64,
    /// Advisory: whether the registry should keep the provider eligible.
    pub should_retry: bool,
}

impl NotificationResult {
    pub fn delivered(provider: impl Into<String>, delivery_time_ms: f64) -> Self {
        Self {
            success: true,
            provider: provider.into(),
            error_message: None,
            delivery_time_ms,
            should_retry: false,
        }
    }

    pub fn failed(
        provider: impl Into<String>,
        error_message: impl Into<String>,
        delivery_time_ms: f64,
        should_retry: bool,
    ) -> Self {
        Self {
            success: false,
            provider: provider.into(),
            error_message: Some(error_message.into()),
            delivery_time_ms,
            should_retry,
        }
    }
}

/// Contract every notification backend implements.
///
/// `send_notification` returning `Err` is treated as a crash by the
/// dispatcher (provider marked unhealthy); expected delivery failures should
/// come back as an `Ok` result with `success = false` and an advisory
/// `should_retry`.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn identifier(&self) -> &str;

    fn validate_config(&self) -> bool;

    async fn health_check(&self) -> ProviderHealth;

    async fn send_notification(&self, data: &NotificationData) -> Result<NotificationResult>;
}
