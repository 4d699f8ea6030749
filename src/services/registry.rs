use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::device::{DeviceRegistration, DeviceSummary, Role};

/// In-memory device registry shared by the HTTP handlers and the dispatcher.
/// Every mutation goes through the write lock.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<String, DeviceRegistration>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the registration keyed by token. Returns the
    /// registry size afterwards.
    pub async fn upsert(&self, token: String, recipient_id: Option<String>, role: Role) -> usize {
        let mut devices = self.devices.write().await;
        match devices.get_mut(&token) {
            Some(existing) => {
                log::info!(
                    "Token already registered, updating recipient {:?} -> {:?} ({})",
                    existing.recipient_id,
                    recipient_id,
                    role
                );
                existing.recipient_id = recipient_id;
                existing.role = role;
            }
            None => {
                log::info!("Token registered for recipient {:?} ({})", recipient_id, role);
                devices.insert(token.clone(), DeviceRegistration::new(token, recipient_id, role));
            }
        }
        devices.len()
    }

    /// Removes the registration if present. Returns whether anything was removed.
    pub async fn remove(&self, token: &str) -> bool {
        self.devices.write().await.remove(token).is_some()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    pub async fn tokens_for(&self, recipient_id: &str) -> Vec<String> {
        let devices = self.devices.read().await;
        let mut tokens: Vec<String> = devices
            .values()
            .filter(|d| d.recipient_id.as_deref() == Some(recipient_id))
            .map(|d| d.token.clone())
            .collect();
        tokens.sort();
        tokens
    }

    pub async fn tokens_with_role<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(Role) -> bool,
    {
        let devices = self.devices.read().await;
        let mut tokens: Vec<String> = devices
            .values()
            .filter(|d| predicate(d.role))
            .map(|d| d.token.clone())
            .collect();
        tokens.sort();
        tokens
    }

    pub async fn summaries(&self) -> Vec<DeviceSummary> {
        let devices = self.devices.read().await;
        let mut list: Vec<&DeviceRegistration> = devices.values().collect();
        list.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.token.cmp(&b.token)));
        list.into_iter().map(DeviceRegistration::summary).collect()
    }

    #[cfg(test)]
    pub async fn get(&self, token: &str) -> Option<DeviceRegistration> {
        self.devices.read().await.get(token).cloned()
    }
}
