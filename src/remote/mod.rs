//! Remote key/value store client.

mod api_types;
mod client;

pub use api_types::{BatchAction, BatchError, BatchOutcome, BatchRequest, WireOperation};
pub use client::{
  HttpRemoteStore, RemoteConfig, RemoteStore, DEFAULT_BATCH_TIMEOUT, DEFAULT_TIMEOUT,
};

/// Remote keys for the three collections. The feedback collection is split
/// into an index plus one key per item so large inboxes can paginate at the
/// storage layer.
pub const TASKS_KEY: &str = "tasks";
pub const PROJECTS_KEY: &str = "projects";
pub const FEEDBACK_INDEX_KEY: &str = "feedback:index";
/// Pre-index layout: one bulk key holding every feedback item.
pub const FEEDBACK_LEGACY_KEY: &str = "feedbackItems";

pub fn feedback_item_key(id: i64) -> String {
  format!("feedback:item:{}", id)
}

/// Entity type segment of the batch endpoint path.
pub const FEEDBACK_ENTITY: &str = "feedback";
