//! Credential-scoped cache over a [`LocalStore`].
//!
//! Every cached collection is namespaced by the active credential so
//! switching accounts never leaks another account's data into the session.
//! Storage failures are swallowed: a read that fails is a cache miss, a
//! write that fails is skipped with a warning. The cache is an
//! optimization, never a source of truth.

use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::store::LocalStore;

/// Base keys for the persisted collections. The `v1` suffix leaves room to
/// change the serialized layout without misreading old entries.
pub const TASKS_CACHE: &str = "tasksCache:v1";
pub const PROJECTS_CACHE: &str = "projectsCache:v1";
pub const FEEDBACK_CACHE: &str = "feedbackItemsCache:v1";
pub const FEEDBACK_INDEX_CACHE: &str = "feedbackIndexCache:v1";
pub const FEEDBACK_QUEUE: &str = "feedbackDeltaQueue";

/// Cache wrapper that namespaces keys by the active credential.
pub struct ScopedCache<S: LocalStore> {
  store: Arc<S>,
  credential: RwLock<Option<String>>,
}

impl<S: LocalStore> ScopedCache<S> {
  pub fn new(store: S) -> Self {
    Self { store: Arc::new(store), credential: RwLock::new(None) }
  }

  /// Set (or clear) the active credential. Entries cached under a previous
  /// credential become unreachable, not merged.
  pub fn set_credential(&self, credential: Option<String>) {
    let mut slot = self.credential.write().unwrap_or_else(|e| e.into_inner());
    *slot = credential;
  }

  /// Compute the storage key for `base_key` under the active credential.
  ///
  /// The scope suffix is a short digest of the token rather than the token
  /// itself, so bearer tokens never appear as storage keys while distinct
  /// credentials still map to distinct scopes.
  pub fn scoped_key(&self, base_key: &str) -> String {
    let slot = self.credential.read().unwrap_or_else(|e| e.into_inner());
    match slot.as_deref() {
      Some(token) => format!("{}:{}", base_key, scope_digest(token)),
      None => base_key.to_string(),
    }
  }

  /// Load a cached collection; any failure reads as empty.
  pub fn load<T: DeserializeOwned>(&self, base_key: &str) -> Vec<T> {
    let key = self.scoped_key(base_key);
    match self.store.get(&key) {
      Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!(key, error = %e, "cache entry failed to decode, treating as empty");
        Vec::new()
      }),
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as empty");
        Vec::new()
      }
    }
  }

  /// Persist a collection; failures are logged and skipped.
  pub fn persist<T: Serialize>(&self, base_key: &str, items: &[T]) {
    let key = self.scoped_key(base_key);
    let bytes = match serde_json::to_vec(items) {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!(key, error = %e, "cache entry failed to serialize, skipping persist");
        return;
      }
    };
    if let Err(e) = self.store.put(&key, &bytes) {
      warn!(key, error = %e, "cache write failed, skipping persist");
    }
  }

  /// Remove a cached collection; failures are logged and skipped.
  pub fn clear(&self, base_key: &str) {
    let key = self.scoped_key(base_key);
    if let Err(e) = self.store.remove(&key) {
      warn!(key, error = %e, "cache remove failed");
    }
  }
}

fn scope_digest(token: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(token.as_bytes());
  let digest = hasher.finalize();
  hex::encode(&digest[..8])
}
