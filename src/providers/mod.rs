pub mod discord;
pub mod telegram;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::provider::NotificationProvider;
use crate::transport::HttpClient;

/// Instantiate the providers named in the configuration, in order.
///
/// Unknown identifiers are a startup error naming the known set; provider
/// loading is explicit, there is no discovery step.
pub fn build_enabled(
    config: &AppConfig,
    http: &HttpClient,
) -> Result<Vec<Arc<dyn NotificationProvider>>> {
    let mut providers: Vec<Arc<dyn NotificationProvider>> = Vec::new();
    for id in &config.providers.enabled {
        match id.as_str() {
            discord::IDENTIFIER => {
                providers.push(Arc::new(discord::DiscordProvider::from_env(http.clone())?));
            }
            telegram::IDENTIFIER => {
                providers.push(Arc::new(telegram::TelegramProvider::from_env(http.clone())?));
            }
            other => {
                return Err(Error::ConfigurationInvalid {
                    section: "providers",
                    field: "enabled",
                    reason: format!(
                        "unknown provider identifier {other:?}; available providers: {}, {}",
                        discord::IDENTIFIER,
                        telegram::IDENTIFIER
                    ),
                });
            }
        }
    }
    Ok(providers)
}

/// Render the estimated completion as a relative human string.
pub(crate) fn format_eta(etc: Option<chrono::DateTime<chrono::Utc>>) -> String {
    match etc {
        Some(etc) => {
            let seconds = (etc - chrono::Utc::now()).num_seconds().max(0) as f64;
            format!("in {}", crate::format::format_duration(seconds))
        }
        None => "unknown".to_string(),
    }
}
