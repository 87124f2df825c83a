//! Test support: a scripted in-memory remote store.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::remote::{BatchOutcome, RemoteStore, WireOperation};

/// Failure kinds a test can script without owning a `SyncError` (which is
/// not `Clone`).
#[derive(Debug, Clone, Copy)]
pub enum FakeFailure {
  Timeout,
  Transport,
  Unauthorized,
}

impl FakeFailure {
  pub fn to_error(self) -> SyncError {
    match self {
      FakeFailure::Timeout => SyncError::Timeout(Duration::from_secs(20)),
      FakeFailure::Transport => SyncError::Transport("connection refused".to_string()),
      FakeFailure::Unauthorized => SyncError::Unauthorized,
    }
  }
}

/// Scripted reply for one `batch_apply` call.
pub enum BatchReply {
  Outcome(BatchOutcome),
  Fail(FakeFailure),
}

/// One recorded `batch_apply` call.
pub struct BatchCall {
  pub at: tokio::time::Instant,
  pub operations: Vec<WireOperation>,
}

/// In-memory [`RemoteStore`] with scripted failures and call recording.
///
/// Reads serve from a seeded key/value map. `batch_apply` pops one scripted
/// reply per call; with an empty script it acknowledges everything cleanly.
#[derive(Default)]
pub struct FakeRemote {
  values: Mutex<HashMap<String, Value>>,
  pub sets: Mutex<Vec<(String, Value)>>,
  pub gets: Mutex<Vec<String>>,
  read_failure: Mutex<Option<FakeFailure>>,
  batch_script: Mutex<VecDeque<BatchReply>>,
  pub batch_calls: Mutex<Vec<BatchCall>>,
  batch_delay: Mutex<Option<Duration>>,
}

impl FakeRemote {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn seed(&self, key: &str, value: Value) {
    self.values.lock().unwrap().insert(key.to_string(), value);
  }

  pub fn value(&self, key: &str) -> Option<Value> {
    self.values.lock().unwrap().get(key).cloned()
  }

  /// Make every subsequent read fail this way.
  pub fn fail_reads(&self, failure: FakeFailure) {
    *self.read_failure.lock().unwrap() = Some(failure);
  }

  pub fn script_batch(&self, reply: BatchReply) {
    self.batch_script.lock().unwrap().push_back(reply);
  }

  /// Delay every `batch_apply` response, to hold a flush in flight.
  pub fn set_batch_delay(&self, delay: Duration) {
    *self.batch_delay.lock().unwrap() = Some(delay);
  }

  pub fn batch_call_count(&self) -> usize {
    self.batch_calls.lock().unwrap().len()
  }

  fn clean_outcome(count: usize) -> BatchOutcome {
    BatchOutcome {
      success: true,
      processed: count as u32,
      total: count as u32,
      index: None,
      errors: Vec::new(),
    }
  }
}

#[async_trait]
impl RemoteStore for FakeRemote {
  async fn get(&self, key: &str) -> Result<Option<Value>> {
    self.gets.lock().unwrap().push(key.to_string());
    if let Some(failure) = *self.read_failure.lock().unwrap() {
      return Err(failure.to_error());
    }
    Ok(self.values.lock().unwrap().get(key).cloned())
  }

  async fn set(&self, key: &str, value: &Value) -> Result<()> {
    if let Some(failure) = *self.read_failure.lock().unwrap() {
      return Err(failure.to_error());
    }
    self.sets.lock().unwrap().push((key.to_string(), value.clone()));
    self.values.lock().unwrap().insert(key.to_string(), value.clone());
    Ok(())
  }

  async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
    if let Some(failure) = *self.read_failure.lock().unwrap() {
      return Err(failure.to_error());
    }
    let values = self.values.lock().unwrap();
    let mut result = HashMap::new();
    for key in keys {
      self.gets.lock().unwrap().push(key.to_string());
      if let Some(value) = values.get(*key) {
        result.insert(key.to_string(), value.clone());
      }
    }
    Ok(result)
  }

  async fn batch_apply(
    &self,
    _entity_type: &str,
    operations: &[WireOperation],
  ) -> Result<BatchOutcome> {
    self.batch_calls.lock().unwrap().push(BatchCall {
      at: tokio::time::Instant::now(),
      operations: operations.to_vec(),
    });

    let delay = *self.batch_delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let reply = self.batch_script.lock().unwrap().pop_front();
    match reply {
      Some(BatchReply::Outcome(outcome)) => Ok(outcome),
      Some(BatchReply::Fail(failure)) => Err(failure.to_error()),
      None => Ok(Self::clean_outcome(operations.len())),
    }
  }
}
