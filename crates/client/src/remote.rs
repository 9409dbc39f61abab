//! Backend CRUD client.
//!
//! One call per operation, bounded by the configured timeout, no retries.
//! Failures are classified so the coordinator can tell "offline" from
//! "refused".

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use millstock_core::{Record, RecordId, ResourceKind};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::config::ClientConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Unreachable, timed out, or a gateway in front of the backend is down.
    #[error("network error: {0}")]
    Network(String),
    #[error("rejected by backend: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
}

impl RemoteError {
    /// Whether the failure means "could not talk to the backend".
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list(&self, resource: ResourceKind) -> Result<Vec<Record>, RemoteError>;

    /// Create a record; the result carries the server-assigned id.
    async fn create(&self, resource: ResourceKind, record: &Record) -> Result<Record, RemoteError>;

    async fn update(
        &self,
        resource: ResourceKind,
        id: &RecordId,
        record: &Record,
    ) -> Result<Record, RemoteError>;

    async fn delete(&self, resource: ResourceKind, id: &RecordId) -> Result<(), RemoteError>;

    /// Cheap reachability check.
    async fn ping(&self) -> bool;
}

/// `RemoteStore` over the backend's REST surface.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    id_field: String,
}

impl HttpRemoteStore {
    pub fn new(config: &ClientConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.auth_token.clone(),
            id_field: config.id_field.clone(),
        })
    }

    fn collection_url(&self, resource: ResourceKind) -> String {
        format!("{}/{}", self.base_url, resource.as_str())
    }

    fn item_url(&self, resource: ResourceKind, id: &RecordId) -> String {
        format!("{}/{}/{}", self.base_url, resource.as_str(), id)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req.send().await.map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify(status, body))
    }

    /// Read a response body as JSON; an empty body reads as `None`.
    async fn body(resp: reqwest::Response) -> Result<Option<Value>, RemoteError> {
        let text = resp.text().await.map_err(|e| RemoteError::Network(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| RemoteError::Parse(e.to_string()))
    }

    /// Overlay the backend's echo of a record onto what was sent.
    fn merge_echo(&self, sent: &Record, echo: Option<Value>) -> Result<Record, RemoteError> {
        let Some(echo) = echo.map(unwrap_data) else {
            return Ok(sent.clone());
        };
        let decoded = Record::from_wire(echo, &self.id_field)
            .map_err(|e| RemoteError::Parse(e.to_string()))?;

        let mut merged = sent.clone();
        merged.fields.extend(decoded.fields);
        if decoded.id.is_some() {
            merged.id = decoded.id;
        }
        Ok(merged)
    }
}

fn classify(status: StatusCode, body: String) -> RemoteError {
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            RemoteError::Network(format!("backend unavailable ({})", status.as_u16()))
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            RemoteError::Validation(if body.is_empty() { status.to_string() } else { body })
        }
        StatusCode::NOT_FOUND => RemoteError::NotFound(if body.is_empty() { status.to_string() } else { body }),
        other => RemoteError::Api(other.as_u16(), body),
    }
}

/// Accept both `{ "data": ... }` envelopes and bare payloads.
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list(&self, resource: ResourceKind) -> Result<Vec<Record>, RemoteError> {
        let resp = self.send(self.client.get(self.collection_url(resource))).await?;
        let body = Self::body(resp).await?.map(unwrap_data);

        let items = match body {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(RemoteError::Parse(format!(
                    "expected a list of {}, got {}",
                    resource.as_str(),
                    kind_of(&other)
                )));
            }
        };

        items
            .into_iter()
            .map(|item| Record::from_wire(item, &self.id_field).map_err(|e| RemoteError::Parse(e.to_string())))
            .collect()
    }

    async fn create(&self, resource: ResourceKind, record: &Record) -> Result<Record, RemoteError> {
        let mut payload = record.clone();
        payload.id = None;
        let resp = self
            .send(
                self.client
                    .post(self.collection_url(resource))
                    .json(&payload.to_wire(&self.id_field)),
            )
            .await?;

        let created = self.merge_echo(record, Self::body(resp).await?)?;
        if created.id.is_none() {
            return Err(RemoteError::Parse(format!(
                "create response for {} carried no '{}'",
                resource.as_str(),
                self.id_field
            )));
        }
        Ok(created)
    }

    async fn update(
        &self,
        resource: ResourceKind,
        id: &RecordId,
        record: &Record,
    ) -> Result<Record, RemoteError> {
        let mut payload = record.clone();
        payload.id = Some(id.clone());
        let resp = self
            .send(
                self.client
                    .put(self.item_url(resource, id))
                    .json(&payload.to_wire(&self.id_field)),
            )
            .await?;
        self.merge_echo(&payload, Self::body(resp).await?)
    }

    async fn delete(&self, resource: ResourceKind, id: &RecordId) -> Result<(), RemoteError> {
        self.send(self.client.delete(self.item_url(resource, id))).await?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.send(self.client.get(url)).await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!("health check failed: {err}");
                false
            }
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    online: bool,
    tables: HashMap<ResourceKind, Vec<Record>>,
    next_id: u64,
    /// Successful calls left before the store goes offline.
    fail_after: Option<usize>,
    reject_writes: Option<String>,
    calls: Vec<String>,
}

/// In-process backend with switchable connectivity.
///
/// Used by tests and offline demos; ids are assigned as `srv-{n}`.
#[derive(Debug)]
pub struct InMemoryRemote {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                online: true,
                ..MemoryState::default()
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    pub fn set_online(&self, online: bool) {
        self.with_state(|s| {
            s.online = online;
            s.fail_after = None;
        });
    }

    /// Go offline after `n` more successful calls.
    pub fn set_fail_after(&self, n: Option<usize>) {
        self.with_state(|s| s.fail_after = n);
    }

    /// Refuse every create/update with this validation message.
    pub fn set_reject_writes(&self, reason: Option<&str>) {
        self.with_state(|s| s.reject_writes = reason.map(str::to_string));
    }

    /// Every call attempted so far, e.g. `"create stocks"`.
    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    /// Put records straight into the backend table, assigning ids where missing.
    pub fn seed(&self, resource: ResourceKind, records: Vec<Record>) {
        self.with_state(|s| {
            for mut record in records {
                if record.id.is_none() {
                    s.next_id += 1;
                    record.id = Some(RecordId::new(format!("srv-{}", s.next_id)));
                }
                s.tables.entry(resource).or_default().push(record);
            }
        });
    }

    /// Current backend table contents.
    pub fn snapshot(&self, resource: ResourceKind) -> Vec<Record> {
        self.with_state(|s| s.tables.get(&resource).cloned().unwrap_or_default())
    }

    fn enter(&self, s: &mut MemoryState, call: String) -> Result<(), RemoteError> {
        s.calls.push(call.clone());
        if let Some(left) = s.fail_after {
            if left == 0 {
                s.online = false;
                s.fail_after = None;
            } else {
                s.fail_after = Some(left - 1);
            }
        }
        if s.online {
            Ok(())
        } else {
            Err(RemoteError::Network(format!("{call}: connection refused")))
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn list(&self, resource: ResourceKind) -> Result<Vec<Record>, RemoteError> {
        self.with_state(|s| {
            self.enter(s, format!("list {resource}"))?;
            // Fresh local ids, like records decoded off the wire.
            Ok(s.tables
                .get(&resource)
                .map(|rows| {
                    rows.iter()
                        .map(|r| Record {
                            local_id: Default::default(),
                            ..r.clone()
                        })
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    async fn create(&self, resource: ResourceKind, record: &Record) -> Result<Record, RemoteError> {
        self.with_state(|s| {
            self.enter(s, format!("create {resource}"))?;
            if let Some(reason) = &s.reject_writes {
                return Err(RemoteError::Validation(reason.clone()));
            }
            s.next_id += 1;
            let mut created = record.clone();
            created.id = Some(RecordId::new(format!("srv-{}", s.next_id)));
            s.tables.entry(resource).or_default().insert(0, created.clone());
            Ok(created)
        })
    }

    async fn update(
        &self,
        resource: ResourceKind,
        id: &RecordId,
        record: &Record,
    ) -> Result<Record, RemoteError> {
        self.with_state(|s| {
            self.enter(s, format!("update {resource}"))?;
            if let Some(reason) = &s.reject_writes {
                return Err(RemoteError::Validation(reason.clone()));
            }
            let rows = s.tables.entry(resource).or_default();
            let Some(slot) = rows.iter_mut().find(|r| r.id.as_ref() == Some(id)) else {
                return Err(RemoteError::NotFound(format!("{resource}/{id}")));
            };
            let mut updated = record.clone();
            updated.id = Some(id.clone());
            *slot = updated.clone();
            Ok(updated)
        })
    }

    async fn delete(&self, resource: ResourceKind, id: &RecordId) -> Result<(), RemoteError> {
        self.with_state(|s| {
            self.enter(s, format!("delete {resource}"))?;
            let rows = s.tables.entry(resource).or_default();
            let before = rows.len();
            rows.retain(|r| r.id.as_ref() != Some(id));
            if rows.len() == before {
                return Err(RemoteError::NotFound(format!("{resource}/{id}")));
            }
            Ok(())
        })
    }

    async fn ping(&self) -> bool {
        self.with_state(|s| s.online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_failures_count_as_offline() {
        for status in [StatusCode::BAD_GATEWAY, StatusCode::SERVICE_UNAVAILABLE, StatusCode::GATEWAY_TIMEOUT] {
            assert!(classify(status, String::new()).is_connectivity());
        }
        assert_eq!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, "quantity must be positive".into()),
            RemoteError::Validation("quantity must be positive".into())
        );
        assert!(matches!(classify(StatusCode::NOT_FOUND, String::new()), RemoteError::NotFound(_)));
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
            RemoteError::Api(500, "boom".into())
        );
    }

    #[test]
    fn data_envelopes_are_unwrapped() {
        let wrapped = serde_json::json!({ "data": [1, 2] });
        assert_eq!(unwrap_data(wrapped), serde_json::json!([1, 2]));
        let bare = serde_json::json!({ "data": 1, "id": "x" });
        assert_eq!(unwrap_data(bare.clone()), bare);
    }

    #[tokio::test]
    async fn in_memory_remote_assigns_ids_and_prepends() {
        let remote = InMemoryRemote::new();
        let a = remote
            .create(ResourceKind::Stocks, &Record::new().with_field("item", "Bags"))
            .await
            .unwrap();
        let b = remote
            .create(ResourceKind::Stocks, &Record::new().with_field("item", "Twine"))
            .await
            .unwrap();
        assert_eq!(a.id, Some(RecordId::new("srv-1")));
        assert_eq!(b.id, Some(RecordId::new("srv-2")));

        let listed = remote.list(ResourceKind::Stocks).await.unwrap();
        assert_eq!(listed[0].text("item"), Some("Twine"));
        assert_ne!(listed[0].local_id, b.local_id);
    }

    #[tokio::test]
    async fn in_memory_remote_goes_offline_after_budget() {
        let remote = InMemoryRemote::new();
        remote.set_fail_after(Some(1));
        assert!(remote.list(ResourceKind::Dispatches).await.is_ok());
        let err = remote.list(ResourceKind::Dispatches).await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(!remote.ping().await);

        remote.set_online(true);
        let missing = remote.delete(ResourceKind::Dispatches, &RecordId::new("nope")).await;
        assert!(matches!(missing, Err(RemoteError::NotFound(_))));
        assert_eq!(remote.calls().len(), 3);
    }
}
