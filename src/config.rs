use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub odoo: OdooConfig,
    pub push: PushConfig,
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdooConfig {
    pub url: String,
    pub db: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub dry_run: bool,
    pub project_id: String,
    pub endpoint: String,
    pub credentials: PushCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PushCredentials {
    None,
    /// Access tokens are minted and refreshed from the key.
    ServiceAccount(ServiceAccount),
    /// Pre-issued bearer token, used as is until it expires.
    AccessToken(String),
}

/// The fields of a Google service account key that token minting needs.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    pub batch_limit: u32,
    pub recent_ids_capacity: usize,
    pub officer_user_ids: Vec<i64>, // Time-off officers notified for officer-stage approvals
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            request_timeout_secs: 10,
            batch_limit: 20,
            recent_ids_capacity: 100,
            officer_user_ids: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Required values that
    /// are absent or blank are reported as `ConfigError::Missing`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let defaults = PollConfig::default();

        let odoo = OdooConfig {
            url: required("ODOO_URL")?.trim_end_matches('/').to_string(),
            db: required("ODOO_DB")?,
            username: required("ODOO_USERNAME")?,
            password: required("ODOO_PASSWORD")?,
        };

        let dry_run = parse_bool(&lookup, "PUSH_DRY_RUN")?;
        let endpoint = lookup("FCM_ENDPOINT")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://fcm.googleapis.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let push = if dry_run {
            PushConfig {
                dry_run,
                project_id: lookup("FCM_PROJECT_ID").unwrap_or_default(),
                endpoint,
                credentials: PushCredentials::None,
            }
        } else {
            let credentials = push_credentials(&lookup)?;
            let project_id = match (lookup("FCM_PROJECT_ID").filter(|v| !v.trim().is_empty()), &credentials) {
                (Some(id), _) => id,
                (None, PushCredentials::ServiceAccount(account)) => account.project_id.clone(),
                (None, _) => return Err(ConfigError::Missing("FCM_PROJECT_ID")),
            };
            PushConfig {
                dry_run,
                project_id,
                endpoint,
                credentials,
            }
        };

        Ok(Config {
            port: parse_or(&lookup, "PORT", 3000)?,
            odoo,
            push,
            poll: PollConfig {
                interval_secs: parse_or(&lookup, "POLL_INTERVAL_SECS", defaults.interval_secs)?,
                request_timeout_secs: parse_or(
                    &lookup,
                    "REQUEST_TIMEOUT_SECS",
                    defaults.request_timeout_secs,
                )?,
                batch_limit: parse_or(&lookup, "POLL_BATCH_LIMIT", defaults.batch_limit)?,
                recent_ids_capacity: parse_or(
                    &lookup,
                    "RECENT_IDS_CAPACITY",
                    defaults.recent_ids_capacity,
                )?,
                officer_user_ids: lookup("OFFICER_USER_IDS")
                    .unwrap_or_default()
                    .split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect(),
            },
        })
    }
}

/// Service account from `FIREBASE_*` variables, then a pre-issued
/// `FCM_ACCESS_TOKEN`, then the JSON key file.
fn push_credentials<F>(lookup: &F) -> Result<PushCredentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(private_key) = present("FIREBASE_PRIVATE_KEY") {
        return Ok(PushCredentials::ServiceAccount(ServiceAccount {
            project_id: present("FIREBASE_PROJECT_ID").ok_or(ConfigError::Missing("FIREBASE_PROJECT_ID"))?,
            // Keys pasted into a single env line carry escaped newlines.
            private_key: private_key.replace("\\n", "\n"),
            client_email: present("FIREBASE_CLIENT_EMAIL").ok_or(ConfigError::Missing("FIREBASE_CLIENT_EMAIL"))?,
            token_uri: present("FIREBASE_TOKEN_URI").unwrap_or_else(default_token_uri),
        }));
    }

    if let Some(token) = present("FCM_ACCESS_TOKEN") {
        return Ok(PushCredentials::AccessToken(token));
    }

    let path = present("FIREBASE_KEY_FILE").unwrap_or_else(|| "firebase-admin-key.json".to_string());
    let raw = fs::read_to_string(&path).map_err(|e| ConfigError::KeyFile {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    let account: ServiceAccount = serde_json::from_str(&raw).map_err(|e| ConfigError::KeyFile {
        path,
        reason: e.to_string(),
    })?;
    Ok(PushCredentials::ServiceAccount(account))
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, name: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => Err(ConfigError::Invalid { name, value: other.to_string() }),
    }
}
