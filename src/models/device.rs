use serde::{Deserialize, Deserializer, Serialize};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use validator::Validate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Employee,
    Validator,
    Manager,
    Admin,
}

impl Role {
    /// Roles that receive the fallback broadcast when no manager can be found.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Manager | Role::Validator | Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Employee => write!(f, "employee"),
            Role::Validator => write!(f, "validator"),
            Role::Manager => write!(f, "manager"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub token: String,
    pub recipient_id: Option<String>,
    pub role: Role,
    pub registered_at: DateTime<Utc>,
}

impl DeviceRegistration {
    pub fn new(token: String, recipient_id: Option<String>, role: Role) -> Self {
        Self {
            token,
            recipient_id,
            role,
            registered_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            user_id: self.recipient_id.clone(),
            role: self.role,
            registered_at: self.registered_at,
            token_preview: token_preview(&self.token),
            fingerprint: token_fingerprint(&self.token),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTokenRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,

    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterTokenRequest {
    #[serde(default)]
    pub token: String,
}

/// Redacted view returned by the device listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub user_id: Option<String>,
    pub role: Role,
    pub registered_at: DateTime<Utc>,
    pub token_preview: String,
    pub fingerprint: String,
}

pub fn token_preview(token: &str) -> String {
    let head: String = token.chars().take(20).collect();
    format!("{}...", head)
}

pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Clients send user ids either as JSON strings or numbers.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
