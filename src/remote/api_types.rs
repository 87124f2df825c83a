//! Wire types for the batch-operation endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::FeedbackIndexEntry;

/// What a batch operation does to its target collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchAction {
  Add,
  Update,
  Delete,
}

/// One operation in a batch request. `add`/`update` carry the full item;
/// `delete` carries only the target id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOperation {
  pub action: BatchAction,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub item: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<i64>,
}

impl WireOperation {
  pub fn add(item: Value) -> Self {
    Self { action: BatchAction::Add, item: Some(item), id: None }
  }

  pub fn update(item: Value) -> Self {
    Self { action: BatchAction::Update, item: Some(item), id: None }
  }

  pub fn delete(id: i64) -> Self {
    Self { action: BatchAction::Delete, item: None, id: Some(id) }
  }
}

/// Request body for the batch endpoint. Operations are applied in array
/// order, each atomically on its own.
#[derive(Debug, Serialize)]
pub struct BatchRequest {
  pub operations: Vec<WireOperation>,
}

/// One failed operation in a batch response. `index` points into the
/// request's operations array; a server that cannot attribute the failure
/// omits it, in which case the caller retries the whole batch.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchError {
  #[serde(default)]
  pub index: Option<usize>,
  #[serde(default)]
  pub message: Option<String>,
}

/// Response from the batch endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchOutcome {
  pub success: bool,
  #[serde(default)]
  pub processed: u32,
  #[serde(default)]
  pub total: u32,
  /// Updated collection index, returned when adds changed it.
  #[serde(default)]
  pub index: Option<Vec<FeedbackIndexEntry>>,
  #[serde(default)]
  pub errors: Vec<BatchError>,
}

impl BatchOutcome {
  /// Whether every operation in the batch was applied.
  pub fn is_clean(&self) -> bool {
    self.success && self.errors.is_empty()
  }
}
