//! HTTP client for the remote key/value storage API.
//!
//! The server is a last-writer-wins key/value store with four endpoints:
//! single-key get/set, a multi-key batch get, and a batch-operation
//! endpoint per entity collection. This client attaches the credential,
//! enforces per-request timeouts, and classifies failures into
//! [`SyncError`]; it never retries on its own.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::api_types::{BatchOutcome, BatchRequest, WireOperation};
use crate::error::{Result, SyncError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
/// Batches can be large; give them more room than a single-key request.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for the remote store. Constructed by the host; the
/// core owns no config file, CLI, or environment variable.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
  pub base_url: String,
  /// Bearer token attached to every request when present.
  pub credential: Option<String>,
  pub timeout: Duration,
  pub batch_timeout: Duration,
}

impl RemoteConfig {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      credential: None,
      timeout: DEFAULT_TIMEOUT,
      batch_timeout: DEFAULT_BATCH_TIMEOUT,
    }
  }

  pub fn with_credential(mut self, token: impl Into<String>) -> Self {
    self.credential = Some(token.into());
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
    self.batch_timeout = timeout;
    self
  }
}

/// The remote store operations the rest of the core depends on.
///
/// A 401 anywhere surfaces as [`SyncError::Unauthorized`] - that error is
/// the "session invalid" signal, and callers must not retry it locally.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
  /// Read one key. Missing keys (404 or a literal `null` body) are
  /// `Ok(None)`, not an error.
  async fn get(&self, key: &str) -> Result<Option<Value>>;

  /// Write one key, overwriting any previous value.
  async fn set(&self, key: &str, value: &Value) -> Result<()>;

  /// Read several keys in one round trip. Keys without a value are absent
  /// from the returned map.
  async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

  /// Apply a list of add/update/delete operations against one entity
  /// collection, in array order.
  ///
  /// Server contract: deleting an id that does not exist is a no-op
  /// success, not an error - flush retries after a crash depend on this.
  async fn batch_apply(&self, entity_type: &str, operations: &[WireOperation])
    -> Result<BatchOutcome>;
}

/// Production client over reqwest.
pub struct HttpRemoteStore {
  http: reqwest::Client,
  base_url: Url,
  credential: Option<String>,
  timeout: Duration,
  batch_timeout: Duration,
}

impl HttpRemoteStore {
  pub fn new(config: RemoteConfig) -> Result<Self> {
    // A trailing slash keeps Url::join from eating the last path segment.
    let normalized = if config.base_url.ends_with('/') {
      config.base_url.clone()
    } else {
      format!("{}/", config.base_url)
    };
    let base_url = Url::parse(&normalized)
      .map_err(|e| SyncError::Transport(format!("invalid base url {}: {}", config.base_url, e)))?;

    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| SyncError::Transport(format!("failed to build http client: {}", e)))?;

    Ok(Self {
      http,
      base_url,
      credential: config.credential,
      timeout: config.timeout,
      batch_timeout: config.batch_timeout,
    })
  }

  fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
    let mut url = self
      .base_url
      .join(path)
      .map_err(|e| SyncError::Transport(format!("invalid endpoint {}: {}", path, e)))?;
    if !query.is_empty() {
      let mut pairs = url.query_pairs_mut();
      for (name, value) in query {
        pairs.append_pair(name, value);
      }
    }
    Ok(url)
  }

  fn request(&self, builder: reqwest::RequestBuilder, timeout: Duration) -> reqwest::RequestBuilder {
    let builder = builder.timeout(timeout);
    match &self.credential {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  fn classify(&self, error: reqwest::Error, timeout: Duration) -> SyncError {
    if error.is_timeout() {
      SyncError::Timeout(timeout)
    } else {
      SyncError::Transport(error.to_string())
    }
  }
}

/// Map a non-success status to the error taxonomy. 404 is handled by the
/// callers for which it is meaningful before this runs.
fn check_status(status: StatusCode) -> Result<()> {
  if status == StatusCode::UNAUTHORIZED {
    return Err(SyncError::Unauthorized);
  }
  if !status.is_success() {
    return Err(SyncError::RequestFailed(status.as_u16()));
  }
  Ok(())
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
  async fn get(&self, key: &str) -> Result<Option<Value>> {
    let url = self.endpoint("api/storage", &[("key", key)])?;

    let response = self
      .request(self.http.get(url), self.timeout)
      .send()
      .await
      .map_err(|e| self.classify(e, self.timeout))?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    check_status(response.status())?;

    let value: Value = response
      .json()
      .await
      .map_err(|e| SyncError::BadResponse(e.to_string()))?;

    debug!(key, "fetched remote key");
    Ok(if value.is_null() { None } else { Some(value) })
  }

  async fn set(&self, key: &str, value: &Value) -> Result<()> {
    let url = self.endpoint("api/storage", &[("key", key)])?;

    let response = self
      .request(self.http.post(url).json(value), self.timeout)
      .send()
      .await
      .map_err(|e| self.classify(e, self.timeout))?;

    check_status(response.status())?;
    debug!(key, "wrote remote key");
    Ok(())
  }

  async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
    let joined = keys.join(",");
    let url = self.endpoint("api/storage/batch", &[("keys", &joined)])?;

    let response = self
      .request(self.http.get(url), self.timeout)
      .send()
      .await
      .map_err(|e| self.classify(e, self.timeout))?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(HashMap::new());
    }
    check_status(response.status())?;

    let values: HashMap<String, Value> = response
      .json()
      .await
      .map_err(|e| SyncError::BadResponse(e.to_string()))?;

    debug!(requested = keys.len(), received = values.len(), "fetched remote keys");
    Ok(values.into_iter().filter(|(_, v)| !v.is_null()).collect())
  }

  async fn batch_apply(
    &self,
    entity_type: &str,
    operations: &[WireOperation],
  ) -> Result<BatchOutcome> {
    let url = self.endpoint(&format!("api/batch-{}", entity_type), &[])?;
    let body = BatchRequest { operations: operations.to_vec() };

    let response = self
      .request(self.http.post(url).json(&body), self.batch_timeout)
      .send()
      .await
      .map_err(|e| self.classify(e, self.batch_timeout))?;

    check_status(response.status())?;

    let outcome: BatchOutcome = response
      .json()
      .await
      .map_err(|e| SyncError::BadResponse(e.to_string()))?;

    debug!(
      entity_type,
      sent = operations.len(),
      processed = outcome.processed,
      errors = outcome.errors.len(),
      "applied batch"
    );
    Ok(outcome)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(server: &mockito::ServerGuard) -> HttpRemoteStore {
    HttpRemoteStore::new(RemoteConfig::new(server.url()).with_credential("test-token")).unwrap()
  }

  #[tokio::test]
  async fn test_get_returns_value() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/api/storage?key=tasks")
      .match_header("authorization", "Bearer test-token")
      .with_status(200)
      .with_body(r#"[{"id": 1}]"#)
      .create_async()
      .await;

    let value = client(&server).get("tasks").await.unwrap();

    assert_eq!(value, Some(serde_json::json!([{ "id": 1 }])));
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_get_treats_404_as_missing() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/storage?key=tasks")
      .with_status(404)
      .create_async()
      .await;

    assert_eq!(client(&server).get("tasks").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_get_treats_null_body_as_missing() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/storage?key=tasks")
      .with_status(200)
      .with_body("null")
      .create_async()
      .await;

    assert_eq!(client(&server).get("tasks").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_401_is_unauthorized() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/storage?key=tasks")
      .with_status(401)
      .create_async()
      .await;

    let err = client(&server).get("tasks").await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized));
  }

  #[tokio::test]
  async fn test_other_status_is_request_failed() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/api/storage?key=tasks")
      .with_status(503)
      .create_async()
      .await;

    let err = client(&server).set("tasks", &serde_json::json!([])).await.unwrap_err();
    assert!(matches!(err, SyncError::RequestFailed(503)));
    assert!(err.is_transient());
  }

  #[tokio::test]
  async fn test_get_many_drops_null_values() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/storage/batch?keys=tasks%2Cprojects")
      .with_status(200)
      .with_body(r#"{"tasks": [{"id": 1}], "projects": null}"#)
      .create_async()
      .await;

    let values = client(&server).get_many(&["tasks", "projects"]).await.unwrap();

    assert_eq!(values.len(), 1);
    assert!(values.contains_key("tasks"));
  }

  #[tokio::test]
  async fn test_batch_apply_roundtrip() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/api/batch-feedback")
      .match_body(mockito::Matcher::PartialJson(serde_json::json!({
        "operations": [{ "action": "delete", "id": 4 }]
      })))
      .with_status(200)
      .with_body(
        r#"{"success": true, "processed": 1, "total": 1,
            "index": [{"id": 7, "status": "open"}], "errors": []}"#,
      )
      .create_async()
      .await;

    let outcome = client(&server)
      .batch_apply("feedback", &[WireOperation::delete(4)])
      .await
      .unwrap();

    assert!(outcome.is_clean());
    assert_eq!(outcome.index.as_ref().unwrap()[0].id, 7);
    mock.assert_async().await;
  }
}
