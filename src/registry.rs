use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::provider::NotificationProvider;

/// Delivery health for one registered provider.
///
/// Mutated only through registry operations; records outlive mover cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHealth {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub last_check: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl ProviderHealth {
    /// A fresh, healthy record.
    pub fn healthy() -> Self {
        Self {
            is_healthy: true,
            consecutive_failures: 0,
            last_check: Utc::now(),
            last_error: None,
        }
    }
}

struct Entry {
    id: String,
    provider: Arc<dyn NotificationProvider>,
    health: ProviderHealth,
}

/// Ordered provider registry with per-provider health records.
///
/// Entries keep registration order, which the dispatcher relies on for
/// result ordering. Cloning is cheap — clones share the same underlying
/// data via Arc.
#[derive(Clone)]
pub struct ProviderRegistry {
    entries: Arc<RwLock<Vec<Entry>>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a provider under a unique identifier.
    pub async fn register(
        &self,
        id: &str,
        provider: Arc<dyn NotificationProvider>,
        initial_health: ProviderHealth,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|entry| entry.id == id) {
            return Err(Error::invalid_argument(format!(
                "provider {id} is already registered"
            )));
        }
        entries.push(Entry {
            id: id.to_string(),
            provider,
            health: initial_health,
        });
        info!(provider_identifier = id, "Registered provider");
        Ok(())
    }

    /// Remove a provider. A no-op when the id is unknown.
    pub async fn unregister(&self, id: &str) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() < before {
            info!(provider_identifier = id, "Unregistered provider");
        }
    }

    /// Healthy providers in registration order.
    pub async fn get_healthy_entries(&self) -> Vec<(String, Arc<dyn NotificationProvider>)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|entry| entry.health.is_healthy)
            .map(|entry| (entry.id.clone(), Arc::clone(&entry.provider)))
            .collect()
    }

    /// Reset a provider's record after a successful delivery.
    pub async fn record_success(&self, id: &str) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) else {
            debug!(provider_identifier = id, "record_success for unknown provider");
            return;
        };
        entry.health.is_healthy = true;
        entry.health.consecutive_failures = 0;
        entry.health.last_check = Utc::now();
        entry.health.last_error = None;
    }

    /// Note a transient failure; the provider stays eligible.
    pub async fn mark_for_retry(&self, id: &str, error: &str) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) else {
            debug!(provider_identifier = id, "mark_for_retry for unknown provider");
            return;
        };
        entry.health.consecutive_failures += 1;
        entry.health.last_check = Utc::now();
        entry.health.last_error = Some(error.to_string());
    }

    /// Take a provider out of rotation after a hard failure.
    pub async fn mark_unhealthy(&self, id: &str, error: &str) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) else {
            debug!(provider_identifier = id, "mark_unhealthy for unknown provider");
            return;
        };
        entry.health.is_healthy = false;
        entry.health.consecutive_failures += 1;
        entry.health.last_check = Utc::now();
        entry.health.last_error = Some(error.to_string());
    }

    /// Snapshot of one provider's health record.
    pub async fn health(&self, id: &str) -> Option<ProviderHealth> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.health.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
