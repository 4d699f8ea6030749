use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set in the environment or .env file")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("service account key {path} could not be loaded ({reason}); set FIREBASE_PRIVATE_KEY or FIREBASE_KEY_FILE")]
    KeyFile { path: String, reason: String },
}

/// Failures talking to the record store. All of them abort the current tick
/// of the affected category only.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("call timed out")]
    Timeout,

    #[error("remote error: {0}")]
    Rpc(String),

    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("token is no longer registered: {0}")]
    InvalidToken(String),

    #[error("delivery failed: {0}")]
    Transient(String),

    #[error("push credentials rejected: {0}")]
    Unauthorized(String),
}

/// Failures obtaining an OAuth access token for the push service.
#[derive(Error, Debug)]
pub enum PushAuthError {
    #[error("no push credentials configured")]
    NotConfigured,

    #[error("invalid service account key: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),

    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token endpoint answered HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<PushAuthError> for DeliveryError {
    fn from(err: PushAuthError) -> Self {
        match err {
            PushAuthError::Transport(e) => DeliveryError::Transient(format!("token request failed: {}", e)),
            other => DeliveryError::Unauthorized(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transient(err.to_string())
    }
}
