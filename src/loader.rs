//! Cache-first loading of the three synchronized collections.
//!
//! `load_all` either serves the cached snapshot immediately and reconciles
//! with the network in the background, or loads from the network inline
//! when there is nothing cached (or the caller asked for fresh data). The
//! caller always gets *a* dataset back - possibly stale, possibly empty -
//! never an error; the one exception in spirit is a 401, which flips the
//! `unauthorized` flag so the host can redirect to login.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{
  LocalStore, ScopedCache, FEEDBACK_CACHE, FEEDBACK_INDEX_CACHE, PROJECTS_CACHE, TASKS_CACHE,
};
use crate::engine::AuthSignal;
use crate::error::{Result, SyncError};
use crate::fingerprint::dataset_fingerprint;
use crate::merge::merge;
use crate::remote::{
  feedback_item_key, RemoteStore, FEEDBACK_INDEX_KEY, FEEDBACK_LEGACY_KEY, PROJECTS_KEY, TASKS_KEY,
};
use crate::types::{Dataset, FeedbackIndexEntry, FeedbackItem, Project, Task, Trackable};

/// Callback invoked when a background refresh produced data that actually
/// differs from the snapshot that was served.
pub type RefreshCallback = Box<dyn FnOnce(Dataset) + Send + 'static>;

/// Options for one `load_all` call.
#[derive(Default)]
pub struct LoadOptions {
  /// Serve the cached snapshot immediately when one exists, refreshing in
  /// the background.
  pub prefer_cache: bool,
  /// Cap on per-item fetches for not-done feedback on first paint.
  pub limit_pending: Option<usize>,
  /// Cap on per-item fetches for done feedback on first paint.
  pub limit_done: Option<usize>,
  /// Invoked with fresh data when a background refresh changed anything.
  pub on_refresh: Option<RefreshCallback>,
}

impl LoadOptions {
  pub fn cache_first() -> Self {
    Self { prefer_cache: true, ..Self::default() }
  }

  pub fn with_feedback_limits(mut self, pending: usize, done: usize) -> Self {
    self.limit_pending = Some(pending);
    self.limit_done = Some(done);
    self
  }

  pub fn with_on_refresh(mut self, callback: impl FnOnce(Dataset) + Send + 'static) -> Self {
    self.on_refresh = Some(Box::new(callback));
    self
  }
}

/// Where the returned dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
  /// Cached snapshot; a background refresh is running.
  Cache,
  /// Fresh network data.
  Network,
  /// The network load failed and nothing was cached; the dataset is empty.
  Unresolved,
}

/// Result of `load_all`.
pub struct LoadResult {
  pub data: Dataset,
  pub source: LoadSource,
  /// The session is no longer valid; the host should redirect to login.
  pub unauthorized: bool,
}

/// Orchestrates "read fast from cache, reconcile with network behind it".
pub struct EntityLoader<R: RemoteStore, S: LocalStore> {
  remote: Arc<R>,
  cache: Arc<ScopedCache<S>>,
  auth: Arc<AuthSignal>,
}

impl<R: RemoteStore, S: LocalStore> Clone for EntityLoader<R, S> {
  fn clone(&self) -> Self {
    Self {
      remote: Arc::clone(&self.remote),
      cache: Arc::clone(&self.cache),
      auth: Arc::clone(&self.auth),
    }
  }
}

impl<R: RemoteStore, S: LocalStore + 'static> EntityLoader<R, S> {
  pub fn new(remote: Arc<R>, cache: Arc<ScopedCache<S>>, auth: Arc<AuthSignal>) -> Self {
    Self { remote, cache, auth }
  }

  /// Load all three collections.
  ///
  /// With `prefer_cache` and a non-empty cache this returns immediately and
  /// spawns an unawaited network load; `options.on_refresh` fires when that
  /// load succeeds with a dataset whose fingerprint differs from the served
  /// snapshot. Otherwise the network load runs inline.
  pub async fn load_all(&self, mut options: LoadOptions) -> LoadResult {
    if options.prefer_cache {
      let cached = self.cached_snapshot();
      if !cached.is_empty() {
        self.spawn_background_refresh(&cached, &mut options);
        return LoadResult { data: cached, source: LoadSource::Cache, unauthorized: false };
      }
    }

    match self.network_load(options.limit_pending, options.limit_done).await {
      Ok(data) => LoadResult { data, source: LoadSource::Network, unauthorized: false },
      Err(SyncError::Unauthorized) => {
        self.auth.fire();
        LoadResult { data: Dataset::default(), source: LoadSource::Unresolved, unauthorized: true }
      }
      Err(e) => {
        warn!(error = %e, "network load failed, returning empty dataset");
        LoadResult { data: Dataset::default(), source: LoadSource::Unresolved, unauthorized: false }
      }
    }
  }

  fn cached_snapshot(&self) -> Dataset {
    Dataset {
      tasks: self.cache.load(TASKS_CACHE),
      projects: self.cache.load(PROJECTS_CACHE),
      feedback: self.cache.load(FEEDBACK_CACHE),
    }
  }

  fn spawn_background_refresh(&self, served: &Dataset, options: &mut LoadOptions) {
    let baseline = dataset_fingerprint(served);
    let loader = self.clone();
    let on_refresh = options.on_refresh.take();
    let (limit_pending, limit_done) = (options.limit_pending, options.limit_done);

    tokio::spawn(async move {
      match loader.network_load(limit_pending, limit_done).await {
        Ok(fresh) => {
          if dataset_fingerprint(&fresh) == baseline {
            debug!("background refresh was a no-op");
            return;
          }
          if let Some(callback) = on_refresh {
            callback(fresh);
          }
        }
        Err(SyncError::Unauthorized) => loader.auth.fire(),
        Err(e) => warn!(error = %e, "background refresh failed, keeping cached snapshot"),
      }
    });
  }

  /// One network load: a single multi-key round trip for the top-level
  /// keys, the feedback sub-protocol, then cache write-back.
  async fn network_load(
    &self,
    limit_pending: Option<usize>,
    limit_done: Option<usize>,
  ) -> Result<Dataset> {
    let values = self
      .remote
      .get_many(&[TASKS_KEY, PROJECTS_KEY, FEEDBACK_INDEX_KEY])
      .await?;

    let tasks: Vec<Task> = decode_collection(values.get(TASKS_KEY), TASKS_KEY);
    let projects: Vec<Project> = decode_collection(values.get(PROJECTS_KEY), PROJECTS_KEY);

    let (index, feedback) = match values.get(FEEDBACK_INDEX_KEY) {
      Some(raw) => {
        let index: Vec<FeedbackIndexEntry> = decode_collection(Some(raw), FEEDBACK_INDEX_KEY);
        let items = self.load_feedback_items(&index, limit_pending, limit_done).await?;
        (index, items)
      }
      None => self.legacy_feedback_load().await?,
    };

    self.cache.persist(TASKS_CACHE, &tasks);
    self.cache.persist(PROJECTS_CACHE, &projects);
    self.cache.persist(FEEDBACK_INDEX_CACHE, &index);

    // Feedback is merged, not overwritten: the cache may hold optimistic
    // applications of queued operations the network doesn't know about yet.
    let feedback = merge(self.cache.load(FEEDBACK_CACHE), feedback);
    self.cache.persist(FEEDBACK_CACHE, &feedback);

    Ok(Dataset { tasks, projects, feedback })
  }

  /// Fetch per-item feedback keys listed by the index, bounded per status
  /// class so a large inbox doesn't stall first paint.
  async fn load_feedback_items(
    &self,
    index: &[FeedbackIndexEntry],
    limit_pending: Option<usize>,
    limit_done: Option<usize>,
  ) -> Result<Vec<FeedbackItem>> {
    let mut pending_taken = 0usize;
    let mut done_taken = 0usize;
    let mut selected: Vec<i64> = Vec::new();

    for entry in index {
      let (taken, limit) = if entry.is_done() {
        (&mut done_taken, limit_done)
      } else {
        (&mut pending_taken, limit_pending)
      };
      if limit.is_some_and(|cap| *taken >= cap) {
        continue;
      }
      *taken += 1;
      selected.push(entry.id);
    }

    let keys: Vec<String> = selected.iter().map(|id| feedback_item_key(*id)).collect();
    let fetches = keys.iter().map(|key| self.remote.get(key));
    let mut items = Vec::with_capacity(selected.len());
    for (id, result) in selected.iter().zip(join_all(fetches).await) {
      match result {
        Ok(Some(raw)) => match serde_json::from_value::<FeedbackItem>(raw) {
          Ok(item) => items.push(item),
          Err(e) => warn!(id, error = %e, "feedback item failed to decode, skipping"),
        },
        Ok(None) => debug!(id, "feedback item listed in index but missing"),
        Err(SyncError::Unauthorized) => return Err(SyncError::Unauthorized),
        Err(e) => warn!(id, error = %e, "feedback item failed to load, skipping"),
      }
    }

    Ok(items)
  }

  /// Pre-index layout: a single bulk key holds every item. Migrate it once
  /// into the index + per-item layout. The migration is additive - the
  /// bulk key is left in place for older clients.
  async fn legacy_feedback_load(&self) -> Result<(Vec<FeedbackIndexEntry>, Vec<FeedbackItem>)> {
    let raw = match self.remote.get(FEEDBACK_LEGACY_KEY).await? {
      Some(raw) => raw,
      None => return Ok((Vec::new(), Vec::new())),
    };

    let items: Vec<FeedbackItem> = decode_collection(Some(&raw), FEEDBACK_LEGACY_KEY);
    let index: Vec<FeedbackIndexEntry> = items
      .iter()
      .map(|item| FeedbackIndexEntry { id: item.id, status: item.status.clone() })
      .collect();

    debug!(count = items.len(), "migrating bulk feedback key to index layout");

    if let Ok(index_value) = serde_json::to_value(&index) {
      self.write_migrated(FEEDBACK_INDEX_KEY.to_string(), index_value).await?;
    }
    for item in &items {
      if let Ok(item_value) = serde_json::to_value(item) {
        self.write_migrated(feedback_item_key(item.id), item_value).await?;
      }
    }

    Ok((index, items))
  }

  /// Migration writes must not fail the load they piggyback on - except on
  /// 401, which is fatal everywhere.
  async fn write_migrated(&self, key: String, value: Value) -> Result<()> {
    match self.remote.set(&key, &value).await {
      Ok(()) => Ok(()),
      Err(SyncError::Unauthorized) => Err(SyncError::Unauthorized),
      Err(e) => {
        warn!(key, error = %e, "feedback migration write failed, will retry next load");
        Ok(())
      }
    }
  }
}

/// Decode a remote collection value leniently: items that fail to decode
/// are skipped rather than sinking the whole collection.
fn decode_collection<T: Trackable>(value: Option<&Value>, key: &str) -> Vec<T> {
  let Some(value) = value else {
    return Vec::new();
  };
  let Some(entries) = value.as_array() else {
    warn!(key, "remote value is not an array, treating as empty");
    return Vec::new();
  };

  let mut items = Vec::with_capacity(entries.len());
  let mut skipped = 0usize;
  for entry in entries {
    match serde_json::from_value(entry.clone()) {
      Ok(item) => items.push(item),
      Err(_) => skipped += 1,
    }
  }
  if skipped > 0 {
    warn!(key, skipped, "some entries failed to decode and were skipped");
  }
  items
}
