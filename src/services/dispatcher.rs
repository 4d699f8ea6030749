use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PushConfig;
use crate::error::{DeliveryError, PushAuthError};
use crate::services::fcm_auth::{token_source, AccessTokenSource};
use crate::models::notification::{NotificationContent, PushMessage};
use crate::services::registry::DeviceRegistry;

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), DeliveryError>;
}

/// Firebase Cloud Messaging HTTP v1 transport.
#[derive(Clone)]
pub struct FcmGateway {
    client: Client,
    config: PushConfig,
    tokens: Arc<dyn AccessTokenSource>,
}

impl FcmGateway {
    pub fn new(config: PushConfig, timeout: Duration) -> Result<Self, PushAuthError> {
        let client = Client::builder().timeout(timeout).build()?;
        let tokens = token_source(client.clone(), &config.credentials)?;
        Ok(Self { client, config, tokens })
    }

    fn payload(message: &PushMessage) -> Value {
        json!({
            "message": {
                "token": message.token,
                "notification": {
                    "title": message.title,
                    "body": message.body
                },
                "data": message.data,
                "android": { "priority": "high" },
                "apns": { "payload": { "aps": { "sound": "default" } } }
            }
        })
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), DeliveryError> {
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.config.endpoint, self.config.project_id
        );

        let access_token = self.tokens.token().await?;

        let response = self.client
            .post(&url)
            .bearer_auth(access_token)
            .json(&Self::payload(message))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        let error = classify_fcm_error(status.as_u16(), &body);
        if matches!(error, DeliveryError::Unauthorized(_)) {
            self.tokens.invalidate().await;
        }
        Err(error)
    }
}

/// Maps an FCM error response onto delivery errors. Only an explicit
/// token-level error code marks the token invalid; a bare status never does.
pub fn classify_fcm_error(status: u16, body: &Value) -> DeliveryError {
    let error = body.get("error").cloned().unwrap_or(Value::Null);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no error message")
        .to_string();
    let error_status = error.get("status").and_then(Value::as_str).unwrap_or_default();
    let detail_codes: Vec<&str> = error
        .get("details")
        .and_then(Value::as_array)
        .map(|details| details.iter().filter_map(|d| d.get("errorCode").and_then(Value::as_str)).collect())
        .unwrap_or_default();

    let unregistered = detail_codes.contains(&"UNREGISTERED");
    let bad_token = (detail_codes.contains(&"INVALID_ARGUMENT") || error_status == "INVALID_ARGUMENT")
        && message.to_lowercase().contains("registration token");

    if unregistered || bad_token {
        DeliveryError::InvalidToken(message)
    } else if status == 401 || status == 403 {
        DeliveryError::Unauthorized(format!("HTTP {}: {}", status, message))
    } else {
        DeliveryError::Transient(format!("HTTP {}: {}", status, message))
    }
}

/// Logs messages instead of sending them.
#[derive(Clone, Default)]
pub struct DryRunGateway;

#[async_trait]
impl PushGateway for DryRunGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), DeliveryError> {
        log::info!(
            "[dry-run] push to {}: {} - {} {:?}",
            crate::models::device::token_preview(&message.token),
            message.title,
            message.body,
            message.data
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Skipped,
}

/// One delivery attempt per (token, notification), with registry pruning on
/// permanently invalid tokens.
#[derive(Clone)]
pub struct Dispatcher {
    gateway: Arc<dyn PushGateway>,
    registry: DeviceRegistry,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn PushGateway>, registry: DeviceRegistry, timeout: Duration) -> Self {
        Self { gateway, registry, timeout }
    }

    pub async fn dispatch(&self, token: &str, content: &NotificationContent) -> DispatchOutcome {
        let message = PushMessage::new(token, content);
        let result = match tokio::time::timeout(self.timeout, self.gateway.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Transient("delivery timed out".to_string())),
        };

        match result {
            Ok(()) => {
                log::info!("Notification sent: {}", content.title);
                DispatchOutcome::Delivered
            }
            Err(DeliveryError::InvalidToken(reason)) => {
                let removed = self.registry.remove(token).await;
                log::warn!(
                    "Invalid token {} pruned (removed: {}): {}",
                    crate::models::device::token_preview(token),
                    removed,
                    reason
                );
                DispatchOutcome::Skipped
            }
            Err(err @ DeliveryError::Transient(_)) => {
                log::error!("Push delivery failed: {}", err);
                DispatchOutcome::Skipped
            }
            Err(err @ DeliveryError::Unauthorized(_)) => {
                log::error!("Push service configuration error, check the FCM service account: {}", err);
                DispatchOutcome::Skipped
            }
        }
    }
}
