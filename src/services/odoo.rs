use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::config::OdooConfig;
use crate::error::StoreError;

/// Authenticated handle obtained once per polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub uid: i64,
}

/// A read-only `search_read` call: collection, domain filter, projection,
/// ordering and row limit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub model: String,
    pub domain: Vec<Value>,
    pub fields: Vec<String>,
    pub order: Option<String>,
    pub limit: Option<u32>,
}

impl SearchQuery {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            domain: Vec::new(),
            fields: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn filter(mut self, clause: Value) -> Self {
        self.domain.push(clause);
        self
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn order(mut self, order: &str) -> Self {
        self.order = Some(order.to_string());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn keyword_args(&self) -> Value {
        let mut kwargs = Map::new();
        kwargs.insert("fields".to_string(), json!(self.fields));
        if let Some(order) = &self.order {
            kwargs.insert("order".to_string(), json!(order));
        }
        if let Some(limit) = self.limit {
            kwargs.insert("limit".to_string(), json!(limit));
        }
        Value::Object(kwargs)
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn authenticate(&self) -> Result<Session, StoreError>;

    async fn search_read(&self, session: &Session, query: &SearchQuery) -> Result<Vec<Value>, StoreError>;
}

/// Runs `search_read` and decodes every row into `T`.
pub async fn fetch<T>(
    store: &dyn RecordStore,
    session: &Session,
    query: &SearchQuery,
) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned,
{
    store
        .search_read(session, query)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(StoreError::from))
        .collect()
}

/// Bounds any store call; an elapsed deadline is a transient failure.
pub async fn timed<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout)?
}

#[derive(Clone)]
pub struct OdooClient {
    client: Client,
    config: OdooConfig,
    timeout: Duration,
}

impl OdooClient {
    pub fn new(config: OdooConfig, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config, timeout })
    }

    async fn call(&self, service: &str, method: &str, args: Value) -> Result<Value, StoreError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {
                "service": service,
                "method": method,
                "args": args
            },
            "id": Uuid::new_v4().to_string()
        });

        let request = async {
            let response = self.client
                .post(format!("{}/jsonrpc", self.config.url))
                .json(&payload)
                .send()
                .await?
                .error_for_status()?;
            let body: Value = response.json().await?;
            Ok::<Value, StoreError>(body)
        };

        let body = timed(self.timeout, request).await?;
        unwrap_rpc(body)
    }
}

#[async_trait]
impl RecordStore for OdooClient {
    async fn authenticate(&self) -> Result<Session, StoreError> {
        let args = json!([self.config.db, self.config.username, self.config.password, {}]);
        let result = self.call("common", "authenticate", args).await?;

        match result.as_i64() {
            Some(uid) => {
                log::debug!("Record store authentication succeeded (uid {})", uid);
                Ok(Session { uid })
            }
            None => Err(StoreError::Authentication(format!(
                "credentials rejected for {}",
                self.config.username
            ))),
        }
    }

    async fn search_read(&self, session: &Session, query: &SearchQuery) -> Result<Vec<Value>, StoreError> {
        let args = json!([
            self.config.db,
            session.uid,
            self.config.password,
            query.model,
            "search_read",
            [query.domain],
            query.keyword_args()
        ]);

        match self.call("object", "execute_kw", args).await? {
            Value::Array(rows) => Ok(rows),
            other => Err(StoreError::Rpc(format!(
                "search_read on {} returned {}",
                query.model, other
            ))),
        }
    }
}

/// Extracts `result` from a JSON-RPC envelope or turns `error` into a
/// `StoreError`.
fn unwrap_rpc(mut body: Value) -> Result<Value, StoreError> {
    if let Some(error) = body.get("error") {
        let message = error
            .pointer("/data/message")
            .or_else(|| error.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let name = error.pointer("/data/name").and_then(Value::as_str).unwrap_or_default();
        if name.contains("AccessDenied") || name.contains("SessionExpired") {
            return Err(StoreError::Authentication(message));
        }
        return Err(StoreError::Rpc(message));
    }

    match body.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(StoreError::Rpc("response without result".to_string())),
    }
}
