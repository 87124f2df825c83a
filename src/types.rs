//! Entity types for the three synchronized collections.
//!
//! The core interprets very little: `id` everywhere, `status` on feedback,
//! and the handful of task fields the calendar fingerprint looks at. All
//! other fields ride along untouched in a flattened map so a load/persist
//! round trip never drops data the views put there.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Trait for entities the merge resolver and fingerprints can work with.
pub trait Trackable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Identifier, unique within the entity's collection.
  fn id(&self) -> i64;

  /// Last modification timestamp (ISO 8601), if the entity tracks one.
  fn modified_at(&self) -> Option<&str>;
}

/// A task on the board/calendar/list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project_id: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
  #[serde(default)]
  pub in_backlog: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_modified: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Task {
  /// Whether the task shows up on the calendar at all.
  pub fn has_date(&self) -> bool {
    self.start_date.is_some() || self.due_date.is_some()
  }
}

/// A project grouping tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  pub id: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_modified: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// An item in the feedback inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackItem {
  pub id: i64,
  #[serde(default = "default_feedback_status")]
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_modified: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

fn default_feedback_status() -> String {
  "open".to_string()
}

impl FeedbackItem {
  /// Everything that is not done counts as pending for pagination limits.
  pub fn is_done(&self) -> bool {
    self.status == "done"
  }
}

/// One row of the remote `feedback:index` key: enough to know which
/// per-item keys exist and which pagination bucket each falls into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackIndexEntry {
  pub id: i64,
  #[serde(default = "default_feedback_status")]
  pub status: String,
}

impl FeedbackIndexEntry {
  pub fn is_done(&self) -> bool {
    self.status == "done"
  }
}

impl Trackable for Task {
  fn id(&self) -> i64 {
    self.id
  }

  fn modified_at(&self) -> Option<&str> {
    self.last_modified.as_deref()
  }
}

impl Trackable for Project {
  fn id(&self) -> i64 {
    self.id
  }

  fn modified_at(&self) -> Option<&str> {
    self.last_modified.as_deref()
  }
}

impl Trackable for FeedbackItem {
  fn id(&self) -> i64 {
    self.id
  }

  fn modified_at(&self) -> Option<&str> {
    self.last_modified.as_deref()
  }
}

impl Trackable for FeedbackIndexEntry {
  fn id(&self) -> i64 {
    self.id
  }

  // Index rows don't track modification time.
  fn modified_at(&self) -> Option<&str> {
    None
  }
}

/// The three top-level collections together; what a load produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
  pub tasks: Vec<Task>,
  pub projects: Vec<Project>,
  pub feedback: Vec<FeedbackItem>,
}

impl Dataset {
  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty() && self.projects.is_empty() && self.feedback.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_task_roundtrip_preserves_unknown_fields() {
    let raw = serde_json::json!({
      "id": 3,
      "title": "write release notes",
      "status": "doing",
      "assignee": "sam",
      "tags": ["docs", "release"]
    });

    let task: Task = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(task.id, 3);
    assert_eq!(task.extra.get("assignee"), Some(&Value::from("sam")));

    let back = serde_json::to_value(&task).unwrap();
    assert_eq!(back.get("tags"), raw.get("tags"));
  }

  #[test]
  fn test_feedback_status_defaults_to_open() {
    let item: FeedbackItem = serde_json::from_value(serde_json::json!({ "id": 9 })).unwrap();
    assert_eq!(item.status, "open");
    assert!(!item.is_done());
  }
}
