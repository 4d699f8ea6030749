//! In-memory stand-ins for the record store and the push gateway.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use crate::error::{DeliveryError, StoreError};
use crate::models::notification::PushMessage;
use crate::services::dispatcher::PushGateway;
use crate::services::odoo::{RecordStore, SearchQuery, Session};

#[derive(Default)]
pub struct FakeStore {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    calls: Mutex<Vec<SearchQuery>>,
    failing_models: Mutex<HashSet<String>>,
    reject_auth: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, model: &str, row: Value) {
        self.tables
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push(row);
    }

    pub fn fail_model(&self, model: &str) {
        self.failing_models.lock().unwrap().insert(model.to_string());
    }

    pub fn heal_model(&self, model: &str) {
        self.failing_models.lock().unwrap().remove(model);
    }

    pub fn reject_auth(&self, reject: bool) {
        self.reject_auth.store(reject, AtomicOrdering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SearchQuery> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, model: &str) -> Vec<SearchQuery> {
        self.calls().into_iter().filter(|q| q.model == model).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl RecordStore for FakeStore {
    async fn authenticate(&self) -> Result<Session, StoreError> {
        if self.reject_auth.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Authentication("rejected".to_string()));
        }
        Ok(Session { uid: 2 })
    }

    async fn search_read(&self, _session: &Session, query: &SearchQuery) -> Result<Vec<Value>, StoreError> {
        self.calls.lock().unwrap().push(query.clone());

        if self.failing_models.lock().unwrap().contains(&query.model) {
            return Err(StoreError::Rpc(format!("{} unavailable", query.model)));
        }

        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<Value> = tables
            .get(&query.model)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.domain.iter().all(|clause| matches_clause(row, clause)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            let mut parts = order.split_whitespace();
            let field = parts.next().unwrap_or("id").to_string();
            let descending = parts.next() == Some("desc");
            rows.sort_by(|a, b| {
                let ord = compare(field_value(a, &field), field_value(b, &field));
                if descending { ord.reverse() } else { ord }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }
}

static NULL: Value = Value::Null;

fn field_value<'a>(row: &'a Value, field: &str) -> &'a Value {
    match row.get(field) {
        Some(Value::Array(pair)) if !pair.is_empty() && field != "groups_id" => &pair[0],
        Some(value) => value,
        None => &NULL,
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Null | Value::Bool(false), Value::Null | Value::Bool(false)) => Ordering::Equal,
        (Value::Null | Value::Bool(false), _) => Ordering::Less,
        (_, Value::Null | Value::Bool(false)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn matches_clause(row: &Value, clause: &Value) -> bool {
    let (Some(field), Some(op), Some(expected)) = (
        clause.get(0).and_then(Value::as_str),
        clause.get(1).and_then(Value::as_str),
        clause.get(2),
    ) else {
        return true;
    };
    let actual = field_value(row, field);

    match op {
        "=" => actual == expected,
        "!=" => actual != expected,
        "in" => expected
            .as_array()
            .map(|options| options.iter().any(|o| o == actual))
            .unwrap_or(false),
        ">" => !actual.is_null() && compare(actual, expected) == Ordering::Greater,
        ">=" => !actual.is_null() && compare(actual, expected) != Ordering::Less,
        "<" => !actual.is_null() && compare(actual, expected) == Ordering::Less,
        _ => true,
    }
}

#[derive(Default)]
pub struct FakeGateway {
    sent: Mutex<Vec<PushMessage>>,
    invalid: Mutex<HashSet<String>>,
    flaky: Mutex<HashSet<String>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_invalid(&self, token: &str) {
        self.invalid.lock().unwrap().insert(token.to_string());
    }

    pub fn mark_flaky(&self, token: &str) {
        self.flaky.lock().unwrap().insert(token.to_string());
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_tokens(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.token).collect()
    }
}

#[async_trait]
impl PushGateway for FakeGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), DeliveryError> {
        if self.invalid.lock().unwrap().contains(&message.token) {
            return Err(DeliveryError::InvalidToken(message.token.clone()));
        }
        if self.flaky.lock().unwrap().contains(&message.token) {
            return Err(DeliveryError::Transient("gateway unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
