use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::{PushCredentials, ServiceAccount};
use crate::error::PushAuthError;

pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Supplies the bearer token for push requests.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn token(&self) -> Result<String, PushAuthError>;

    /// Drops any cached token after the push service rejected it.
    async fn invalidate(&self) {}
}

pub fn token_source(client: Client, credentials: &PushCredentials) -> Result<Arc<dyn AccessTokenSource>, PushAuthError> {
    match credentials {
        PushCredentials::ServiceAccount(account) => {
            Ok(Arc::new(ServiceAccountTokens::new(client, account.clone())?))
        }
        PushCredentials::AccessToken(token) => Ok(Arc::new(StaticToken(token.clone()))),
        PushCredentials::None => Err(PushAuthError::NotConfigured),
    }
}

pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn token(&self) -> Result<String, PushAuthError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Default)]
struct TokenCache {
    current: Option<(String, Instant)>,
}

impl TokenCache {
    /// The cached token, unless it expires within the refresh margin.
    fn get(&self, now: Instant) -> Option<String> {
        self.current
            .as_ref()
            .filter(|(_, expires_at)| now + REFRESH_MARGIN < *expires_at)
            .map(|(token, _)| token.clone())
    }

    fn store(&mut self, token: String, lifetime: Duration, now: Instant) {
        self.current = Some((token, now + lifetime));
    }

    fn clear(&mut self) {
        self.current = None;
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

/// OAuth2 JWT-bearer flow for a Google service account: sign an assertion
/// with the account key, exchange it for an access token and reuse that
/// token until shortly before it expires.
pub struct ServiceAccountTokens {
    client: Client,
    account: ServiceAccount,
    key: EncodingKey,
    cache: Mutex<TokenCache>,
}

impl ServiceAccountTokens {
    pub fn new(client: Client, account: ServiceAccount) -> Result<Self, PushAuthError> {
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
        Ok(Self {
            client,
            account,
            key,
            cache: Mutex::new(TokenCache::default()),
        })
    }

    fn claims(&self, now: i64) -> AssertionClaims<'_> {
        AssertionClaims {
            iss: &self.account.client_email,
            scope: FCM_SCOPE,
            aud: &self.account.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        }
    }

    async fn mint(&self) -> Result<TokenResponse, PushAuthError> {
        let assertion = jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &self.claims(Utc::now().timestamp()),
            &self.key,
        )?;

        let response = self
            .client
            .post(&self.account.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushAuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokens {
    async fn token(&self) -> Result<String, PushAuthError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(Instant::now()) {
            return Ok(token);
        }

        let minted = self.mint().await?;
        log::info!(
            "Push access token refreshed for {}, valid for {}s",
            self.account.client_email,
            minted.expires_in
        );
        cache.store(
            minted.access_token.clone(),
            Duration::from_secs(minted.expires_in),
            Instant::now(),
        );
        Ok(minted.access_token)
    }

    async fn invalidate(&self) {
        self.cache.lock().await.clear();
    }
}
