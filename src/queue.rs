//! Durable delta queue for local feedback mutations.
//!
//! Every local create/update/delete must survive a page reload and a
//! transient network outage without being lost or applied twice to the
//! visible list. The queue buffers operations in memory and persists the
//! whole array to durable storage (debounced, always a full overwrite).
//! Each operation is applied optimistically to the cached collection at
//! enqueue time; flushes send a snapshot to the batch endpoint and retry
//! transport failures with bounded exponential backoff.
//!
//! An entry leaves the queue only when the server acknowledges it. A crash
//! between the server committing and the queue clearing therefore retries
//! the batch once - replace-by-id merge semantics make the duplicate
//! add/update harmless, and the store contract makes a duplicate delete a
//! no-op.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::{LocalStore, ScopedCache, FEEDBACK_CACHE, FEEDBACK_INDEX_CACHE, FEEDBACK_QUEUE};
use crate::engine::AuthSignal;
use crate::error::SyncError;
use crate::merge::{merge, remove_by_id};
use crate::remote::{BatchAction, BatchOutcome, RemoteStore, WireOperation, FEEDBACK_ENTITY};
use crate::sched::Debounced;
use crate::types::{FeedbackIndexEntry, FeedbackItem};

/// How long bursts of edits coalesce before the queue hits durable storage.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(250);
/// How long bursts of edits coalesce before a flush goes out.
pub const FLUSH_DEBOUNCE: Duration = Duration::from_secs(2);
/// First retry delay after a transport failure; doubled per attempt.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
/// Transport failures 1..=MAX schedule a retry; past that, auto-retry stops
/// until the next event-driven trigger.
pub const MAX_FLUSH_ATTEMPTS: u32 = 3;

/// UI-visible save state, driven by queue occupancy, flush-in-flight state,
/// and connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
  Saved,
  Saving,
  Error,
  Offline,
}

/// One buffered local mutation. `local_id` is bookkeeping for error
/// callbacks only; it is never sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
  pub local_id: String,
  pub action: BatchAction,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub item: Option<FeedbackItem>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_id: Option<i64>,
  pub enqueued_at: String,
}

impl QueuedOperation {
  fn to_wire(&self) -> Result<WireOperation, SyncError> {
    match self.action {
      BatchAction::Add | BatchAction::Update => {
        let item = self.item.as_ref().ok_or_else(|| {
          SyncError::Storage(format!("queued {:?} without an item", self.action))
        })?;
        let value = serde_json::to_value(item)
          .map_err(|e| SyncError::Storage(format!("failed to encode queued item: {}", e)))?;
        Ok(WireOperation { action: self.action, item: Some(value), id: None })
      }
      BatchAction::Delete => {
        let id = self
          .target_id
          .ok_or_else(|| SyncError::Storage("queued delete without a target id".to_string()))?;
        Ok(WireOperation::delete(id))
      }
    }
  }
}

/// Callback invoked (at most once) when the operation it was registered
/// with is reported failed by the server.
pub type ErrorCallback = Box<dyn FnOnce(String) + Send>;

struct QueueState {
  ops: Vec<QueuedOperation>,
  /// Lazily hydrated from durable storage on first use.
  loaded: bool,
  flush_in_flight: bool,
  retries: u32,
  last_flush_failed: bool,
  error_hooks: HashMap<String, ErrorCallback>,
}

impl QueueState {
  fn new() -> Self {
    Self {
      ops: Vec::new(),
      loaded: false,
      flush_in_flight: false,
      retries: 0,
      last_flush_failed: false,
      error_hooks: HashMap::new(),
    }
  }
}

/// The feedback sync engine's write path.
pub struct DeltaQueue<R: RemoteStore, S: LocalStore + 'static> {
  remote: Arc<R>,
  cache: Arc<ScopedCache<S>>,
  auth: Arc<AuthSignal>,
  state: Mutex<QueueState>,
  persist_debounce: Debounced,
  flush_debounce: Debounced,
  status_tx: watch::Sender<SaveStatus>,
  offline: AtomicBool,
  seq: AtomicU64,
}

impl<R: RemoteStore, S: LocalStore + 'static> DeltaQueue<R, S> {
  pub fn new(remote: Arc<R>, cache: Arc<ScopedCache<S>>, auth: Arc<AuthSignal>) -> Arc<Self> {
    let (status_tx, _) = watch::channel(SaveStatus::Saved);
    Arc::new(Self {
      remote,
      cache,
      auth,
      state: Mutex::new(QueueState::new()),
      persist_debounce: Debounced::new(),
      flush_debounce: Debounced::new(),
      status_tx,
      offline: AtomicBool::new(false),
      seq: AtomicU64::new(0),
    })
  }

  /// Subscribe to the save-status indicator.
  pub fn status(&self) -> watch::Receiver<SaveStatus> {
    self.status_tx.subscribe()
  }

  /// Whether any operation is buffered or a flush is running. Hosts use
  /// this to warn before navigating away.
  pub fn has_unsaved(&self) -> bool {
    let mut state = self.lock_state();
    self.ensure_loaded(&mut state);
    !state.ops.is_empty() || state.flush_in_flight
  }

  pub fn pending_count(&self) -> usize {
    let mut state = self.lock_state();
    self.ensure_loaded(&mut state);
    state.ops.len()
  }

  /// Buffer a local add. Returns the operation's local tracking id.
  pub fn enqueue_add(
    self: &Arc<Self>,
    item: FeedbackItem,
    on_error: Option<ErrorCallback>,
  ) -> String {
    self.enqueue(BatchAction::Add, Some(item), None, on_error)
  }

  /// Buffer a local update.
  pub fn enqueue_update(
    self: &Arc<Self>,
    item: FeedbackItem,
    on_error: Option<ErrorCallback>,
  ) -> String {
    self.enqueue(BatchAction::Update, Some(item), None, on_error)
  }

  /// Buffer a local delete.
  pub fn enqueue_delete(self: &Arc<Self>, id: i64, on_error: Option<ErrorCallback>) -> String {
    self.enqueue(BatchAction::Delete, None, Some(id), on_error)
  }

  fn enqueue(
    self: &Arc<Self>,
    action: BatchAction,
    item: Option<FeedbackItem>,
    target_id: Option<i64>,
    on_error: Option<ErrorCallback>,
  ) -> String {
    let local_id = self.next_local_id();
    let op = QueuedOperation {
      local_id: local_id.clone(),
      action,
      item,
      target_id,
      enqueued_at: Utc::now().to_rfc3339(),
    };

    self.apply_locally(&op);

    {
      let mut state = self.lock_state();
      self.ensure_loaded(&mut state);
      state.ops.push(op);
      if let Some(callback) = on_error {
        state.error_hooks.insert(local_id.clone(), callback);
      }
    }

    self.schedule_persist();
    self.publish_status();
    self.schedule_flush(FLUSH_DEBOUNCE);

    local_id
  }

  /// Send the buffered operations to the server.
  ///
  /// No-op when a flush is already in flight, the queue is empty, or the
  /// client is known offline. Operations enqueued while the flush is on
  /// the wire are not included; they are picked up by the next flush.
  pub async fn flush(self: &Arc<Self>) {
    let snapshot = {
      let mut state = self.lock_state();
      self.ensure_loaded(&mut state);
      if state.flush_in_flight || state.ops.is_empty() || self.offline.load(Ordering::SeqCst) {
        return;
      }
      state.flush_in_flight = true;
      state.ops.clone()
    };
    self.publish_status();

    let wire: Result<Vec<WireOperation>, SyncError> =
      snapshot.iter().map(QueuedOperation::to_wire).collect();
    let result = match wire {
      Ok(operations) => self.remote.batch_apply(FEEDBACK_ENTITY, &operations).await,
      Err(e) => Err(e),
    };

    match result {
      Ok(outcome) if outcome.is_clean() => self.complete_clean(&snapshot, outcome),
      Ok(outcome) => self.complete_partial(&snapshot, &outcome),
      Err(SyncError::Unauthorized) => {
        {
          let mut state = self.lock_state();
          state.flush_in_flight = false;
        }
        warn!("flush rejected: session is no longer valid");
        self.auth.fire();
        self.publish_status();
      }
      Err(e) => self.complete_transport_failure(&e),
    }

    // Anything enqueued while we were on the wire still needs a flush.
    let leftover = {
      let state = self.lock_state();
      !state.ops.is_empty() && !state.last_flush_failed
    };
    if leftover {
      self.schedule_flush(FLUSH_DEBOUNCE);
    }
  }

  fn complete_clean(self: &Arc<Self>, snapshot: &[QueuedOperation], outcome: BatchOutcome) {
    let snapshot_ids: HashSet<&str> = snapshot.iter().map(|op| op.local_id.as_str()).collect();
    {
      let mut state = self.lock_state();
      state.ops.retain(|op| !snapshot_ids.contains(op.local_id.as_str()));
      for op in snapshot {
        state.error_hooks.remove(&op.local_id);
      }
      state.retries = 0;
      state.last_flush_failed = false;
      state.flush_in_flight = false;
    }

    self.persist_now();

    // Adds changed the collection index; the response carries the
    // authoritative version, so the cached copy is replaced outright.
    if let Some(index) = outcome.index {
      self.cache.persist(FEEDBACK_INDEX_CACHE, &index);
    }

    debug!(acknowledged = snapshot.len(), "flush acknowledged");
    self.publish_status();
  }

  fn complete_partial(self: &Arc<Self>, snapshot: &[QueuedOperation], outcome: &BatchOutcome) {
    let mappable = outcome
      .errors
      .iter()
      .all(|e| e.index.is_some_and(|idx| idx < snapshot.len()));

    let failed_ids: HashSet<&str> = if mappable {
      outcome
        .errors
        .iter()
        .filter_map(|e| e.index)
        .map(|idx| snapshot[idx].local_id.as_str())
        .collect()
    } else {
      // The error list can't be mapped to operations; keep the whole
      // snapshot queued for retry.
      snapshot.iter().map(|op| op.local_id.as_str()).collect()
    };

    let snapshot_ids: HashSet<&str> = snapshot.iter().map(|op| op.local_id.as_str()).collect();
    let mut failed_hooks: Vec<(String, ErrorCallback)> = Vec::new();
    {
      let mut state = self.lock_state();
      state
        .ops
        .retain(|op| !snapshot_ids.contains(op.local_id.as_str()) || failed_ids.contains(op.local_id.as_str()));
      if mappable {
        for id in &failed_ids {
          if let Some(hook) = state.error_hooks.remove(*id) {
            failed_hooks.push((id.to_string(), hook));
          }
        }
      }
      for op in snapshot {
        if !failed_ids.contains(op.local_id.as_str()) {
          state.error_hooks.remove(&op.local_id);
        }
      }
      state.last_flush_failed = true;
      state.flush_in_flight = false;
    }

    self.persist_now();

    warn!(
      failed = failed_ids.len(),
      acknowledged = snapshot.len() - failed_ids.len(),
      "flush partially failed"
    );
    for (local_id, hook) in failed_hooks {
      hook(format!("operation {} was rejected by the server", local_id));
    }
    self.publish_status();
  }

  fn complete_transport_failure(self: &Arc<Self>, error: &SyncError) {
    let retry_after = {
      let mut state = self.lock_state();
      state.flush_in_flight = false;
      state.last_flush_failed = true;
      state.retries += 1;
      if state.retries <= MAX_FLUSH_ATTEMPTS {
        Some(RETRY_BASE_DELAY * 2u32.pow(state.retries - 1))
      } else {
        // Give up on auto-retry; the queue stays persisted for the next
        // event-driven trigger, which starts a fresh ladder.
        state.retries = 0;
        None
      }
    };

    match retry_after {
      Some(delay) => {
        warn!(error = %error, retry_in = ?delay, "flush failed, retrying");
        self.schedule_flush(delay);
      }
      None => {
        warn!(error = %error, "flush failed, auto-retry exhausted");
      }
    }
    self.publish_status();
  }

  /// Tell the queue about connectivity changes. Going online triggers a
  /// flush of whatever is buffered.
  pub fn set_online(self: &Arc<Self>, online: bool) {
    self.offline.store(!online, Ordering::SeqCst);
    self.publish_status();
    if online {
      let queue = Arc::clone(self);
      tokio::spawn(async move {
        queue.flush().await;
      });
    }
  }

  /// Drop every buffered operation. Queue state never expires on its own;
  /// this is the only way it ends.
  pub fn clear(&self) {
    {
      let mut state = self.lock_state();
      state.ops.clear();
      state.error_hooks.clear();
      state.retries = 0;
      state.last_flush_failed = false;
      state.loaded = true;
    }
    self.persist_debounce.cancel();
    self.flush_debounce.cancel();
    self.persist_now();
    self.publish_status();
  }

  /// Apply the operation to the cached collection immediately so the UI
  /// reflects it before the network round trip completes.
  fn apply_locally(&self, op: &QueuedOperation) {
    let cached: Vec<FeedbackItem> = self.cache.load(FEEDBACK_CACHE);
    let index: Vec<FeedbackIndexEntry> = self.cache.load(FEEDBACK_INDEX_CACHE);

    match (op.action, &op.item, op.target_id) {
      (BatchAction::Add | BatchAction::Update, Some(item), _) => {
        let entry = FeedbackIndexEntry { id: item.id, status: item.status.clone() };
        self.cache.persist(FEEDBACK_CACHE, &merge(cached, vec![item.clone()]));
        self.cache.persist(FEEDBACK_INDEX_CACHE, &merge(index, vec![entry]));
      }
      (BatchAction::Delete, _, Some(id)) => {
        self.cache.persist(FEEDBACK_CACHE, &remove_by_id(cached, id));
        self.cache.persist(FEEDBACK_INDEX_CACHE, &remove_by_id(index, id));
      }
      _ => warn!(local_id = %op.local_id, "malformed queued operation, skipping local apply"),
    }
  }

  fn schedule_persist(self: &Arc<Self>) {
    let queue = Arc::clone(self);
    self.persist_debounce.schedule(PERSIST_DEBOUNCE, async move {
      queue.persist_now();
    });
  }

  fn persist_now(&self) {
    let ops = {
      let state = self.lock_state();
      state.ops.clone()
    };
    self.cache.persist(FEEDBACK_QUEUE, &ops);
  }

  fn schedule_flush(self: &Arc<Self>, delay: Duration) {
    let queue = Arc::clone(self);
    self.flush_debounce.schedule(delay, async move {
      queue.flush().await;
    });
  }

  fn ensure_loaded(&self, state: &mut QueueState) {
    if state.loaded {
      return;
    }
    let persisted: Vec<QueuedOperation> = self.cache.load(FEEDBACK_QUEUE);
    if !persisted.is_empty() {
      debug!(count = persisted.len(), "restored delta queue from durable storage");
      let mut ops = persisted;
      ops.append(&mut state.ops);
      state.ops = ops;
    }
    state.loaded = true;
  }

  fn publish_status(&self) {
    let status = {
      let state = self.lock_state();
      if self.offline.load(Ordering::SeqCst) {
        SaveStatus::Offline
      } else if state.flush_in_flight {
        SaveStatus::Saving
      } else if state.last_flush_failed {
        SaveStatus::Error
      } else if !state.ops.is_empty() {
        SaveStatus::Saving
      } else {
        SaveStatus::Saved
      }
    };
    self.status_tx.send_replace(status);
  }

  fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn next_local_id(&self) -> String {
    format!(
      "op-{}-{}",
      Utc::now().timestamp_millis(),
      self.seq.fetch_add(1, Ordering::SeqCst)
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::remote::BatchError;
  use crate::testing::{BatchReply, FakeFailure, FakeRemote};
  use std::sync::atomic::AtomicU32;

  type TestQueue = Arc<DeltaQueue<FakeRemote, MemoryStore>>;

  fn queue_with(remote: Arc<FakeRemote>) -> (Arc<ScopedCache<MemoryStore>>, TestQueue) {
    let cache = Arc::new(ScopedCache::new(MemoryStore::new()));
    let auth = Arc::new(AuthSignal::default());
    let queue = DeltaQueue::new(remote, Arc::clone(&cache), auth);
    (cache, queue)
  }

  fn feedback(id: i64, status: &str) -> FeedbackItem {
    FeedbackItem {
      id,
      status: status.to_string(),
      title: None,
      last_modified: None,
      extra: Default::default(),
    }
  }

  fn outcome(success: bool, errors: Vec<BatchError>) -> BatchOutcome {
    BatchOutcome { success, processed: 0, total: 0, index: None, errors }
  }

  fn error_at(index: usize) -> BatchError {
    BatchError { index: Some(index), message: Some("rejected".to_string()) }
  }

  #[tokio::test]
  async fn test_add_flush_success_clears_queue_and_caches_item() {
    let remote = Arc::new(FakeRemote::new());
    let (cache, queue) = queue_with(Arc::clone(&remote));

    queue.enqueue_add(feedback(7, "open"), None);
    queue.flush().await;

    assert_eq!(queue.pending_count(), 0);
    assert!(!queue.has_unsaved());
    assert_eq!(*queue.status().borrow(), SaveStatus::Saved);

    let cached: Vec<FeedbackItem> = cache.load(FEEDBACK_CACHE);
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, 7);
    assert_eq!(cached[0].status, "open");

    let calls = remote.batch_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operations.len(), 1);
    assert_eq!(calls[0].operations[0].action, BatchAction::Add);
  }

  #[tokio::test(start_paused = true)]
  async fn test_queue_survives_reload() {
    let remote = Arc::new(FakeRemote::new());
    let cache = Arc::new(ScopedCache::new(MemoryStore::new()));
    let auth = Arc::new(AuthSignal::default());

    {
      let queue = DeltaQueue::new(Arc::clone(&remote), Arc::clone(&cache), Arc::clone(&auth));
      queue.enqueue_add(feedback(1, "open"), None);
      queue.enqueue_update(feedback(2, "done"), None);
      queue.enqueue_delete(3, None);
      // Let the persist task register its timer, then land the debounced
      // persist without reaching the flush delay.
      tokio::task::yield_now().await;
      tokio::time::advance(PERSIST_DEBOUNCE + Duration::from_millis(10)).await;
      tokio::task::yield_now().await;
    }

    // A fresh queue over the same storage - as after a page reload.
    let reloaded = DeltaQueue::new(Arc::clone(&remote), cache, auth);
    assert_eq!(reloaded.pending_count(), 3);

    reloaded.flush().await;

    assert_eq!(reloaded.pending_count(), 0);
    let calls = remote.batch_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let actions: Vec<BatchAction> = calls[0].operations.iter().map(|op| op.action).collect();
    assert_eq!(actions, vec![BatchAction::Add, BatchAction::Update, BatchAction::Delete]);
  }

  #[tokio::test]
  async fn test_partial_failure_keeps_only_failed_entry() {
    let remote = Arc::new(FakeRemote::new());
    let (_, queue) = queue_with(Arc::clone(&remote));

    queue.enqueue_add(feedback(1, "open"), None);
    queue.enqueue_update(feedback(2, "open"), None);
    queue.enqueue_delete(3, None);
    remote.script_batch(BatchReply::Outcome(outcome(false, vec![error_at(1)])));

    queue.flush().await;

    assert_eq!(queue.pending_count(), 1);
    let state = queue.lock_state();
    assert_eq!(state.ops[0].action, BatchAction::Update);
    assert_eq!(state.ops[0].item.as_ref().unwrap().id, 2);
  }

  #[tokio::test]
  async fn test_partial_failure_of_five_keeps_index_two() {
    let remote = Arc::new(FakeRemote::new());
    let (_, queue) = queue_with(Arc::clone(&remote));

    for id in 1..=5 {
      queue.enqueue_add(feedback(id, "open"), None);
    }
    remote.script_batch(BatchReply::Outcome(outcome(false, vec![error_at(2)])));

    queue.flush().await;

    assert_eq!(queue.pending_count(), 1);
    let state = queue.lock_state();
    assert_eq!(state.ops[0].item.as_ref().unwrap().id, 3);
    assert_eq!(*queue.status().borrow(), SaveStatus::Error);
  }

  #[tokio::test]
  async fn test_unmappable_errors_keep_whole_snapshot() {
    let remote = Arc::new(FakeRemote::new());
    let (_, queue) = queue_with(Arc::clone(&remote));

    queue.enqueue_add(feedback(1, "open"), None);
    queue.enqueue_add(feedback(2, "open"), None);
    remote.script_batch(BatchReply::Outcome(outcome(
      false,
      vec![BatchError { index: None, message: Some("unattributed".to_string()) }],
    )));

    queue.flush().await;

    assert_eq!(queue.pending_count(), 2);
  }

  #[tokio::test]
  async fn test_error_callback_fires_once_and_is_discarded() {
    let remote = Arc::new(FakeRemote::new());
    let (_, queue) = queue_with(Arc::clone(&remote));

    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    queue.enqueue_add(
      feedback(1, "open"),
      Some(Box::new(move |_failure| {
        counter.fetch_add(1, Ordering::SeqCst);
      })),
    );

    remote.script_batch(BatchReply::Outcome(outcome(false, vec![error_at(0)])));
    queue.flush().await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // The retried flush fails the same way; the callback is already gone.
    remote.script_batch(BatchReply::Outcome(outcome(false, vec![error_at(0)])));
    queue.flush().await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_backoff_doubles_and_stops_after_third_retry() {
    let remote = Arc::new(FakeRemote::new());
    let (_, queue) = queue_with(Arc::clone(&remote));
    for _ in 0..4 {
      remote.script_batch(BatchReply::Fail(FakeFailure::Transport));
    }

    queue.enqueue_add(feedback(1, "open"), None);
    queue.flush().await;

    // Drain the retry ladder; paused time auto-advances through the sleeps.
    tokio::time::sleep(Duration::from_secs(60)).await;

    let gaps: Vec<Duration> = {
      let calls = remote.batch_calls.lock().unwrap();
      assert_eq!(calls.len(), 4);
      calls.windows(2).map(|w| w[1].at - w[0].at).collect()
    };
    assert_eq!(gaps[0], RETRY_BASE_DELAY);
    assert_eq!(gaps[1], RETRY_BASE_DELAY * 2);
    assert_eq!(gaps[2], RETRY_BASE_DELAY * 4);

    // No further auto-retry.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(remote.batch_call_count(), 4);

    // The operation is still queued, and the next event-driven trigger
    // starts fresh and succeeds.
    assert_eq!(queue.pending_count(), 1);
    queue.flush().await;
    assert_eq!(queue.pending_count(), 0);
    assert_eq!(remote.batch_call_count(), 5);
  }

  #[tokio::test(start_paused = true)]
  async fn test_flush_is_noop_while_in_flight() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_batch_delay(Duration::from_secs(5));
    let (_, queue) = queue_with(Arc::clone(&remote));

    queue.enqueue_add(feedback(1, "open"), None);

    let first = {
      let queue = Arc::clone(&queue);
      tokio::spawn(async move { queue.flush().await })
    };
    tokio::task::yield_now().await;
    assert_eq!(*queue.status().borrow(), SaveStatus::Saving);

    // Re-entrant flush returns immediately without a second request.
    queue.flush().await;
    first.await.unwrap();
    assert_eq!(remote.batch_call_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_ops_enqueued_during_flight_go_in_next_batch() {
    let remote = Arc::new(FakeRemote::new());
    remote.set_batch_delay(Duration::from_secs(5));
    let (_, queue) = queue_with(Arc::clone(&remote));

    queue.enqueue_add(feedback(1, "open"), None);
    let first = {
      let queue = Arc::clone(&queue);
      tokio::spawn(async move { queue.flush().await })
    };
    tokio::task::yield_now().await;

    queue.enqueue_add(feedback(2, "open"), None);
    first.await.unwrap();

    // The follow-up flush (scheduled because ops remained) drains the rest.
    tokio::time::sleep(FLUSH_DEBOUNCE + Duration::from_secs(1)).await;

    let calls = remote.batch_calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].operations.len(), 1);
    assert_eq!(calls[1].operations.len(), 1);
    assert_eq!(queue.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_offline_skips_flush_and_online_drains() {
    let remote = Arc::new(FakeRemote::new());
    let (_, queue) = queue_with(Arc::clone(&remote));

    queue.set_online(false);
    queue.enqueue_add(feedback(1, "open"), None);
    assert_eq!(*queue.status().borrow(), SaveStatus::Offline);

    queue.flush().await;
    assert_eq!(remote.batch_call_count(), 0);
    assert_eq!(queue.pending_count(), 1);

    queue.set_online(true);
    for _ in 0..20 {
      tokio::task::yield_now().await;
    }
    assert_eq!(remote.batch_call_count(), 1);
    assert_eq!(queue.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_optimistic_apply_updates_cache_before_flush() {
    let remote = Arc::new(FakeRemote::new());
    let (cache, queue) = queue_with(remote);

    cache.persist(FEEDBACK_CACHE, &[feedback(1, "open")]);
    cache.persist(FEEDBACK_INDEX_CACHE, &[FeedbackIndexEntry {
      id: 1,
      status: "open".to_string(),
    }]);

    queue.enqueue_update(feedback(1, "done"), None);
    queue.enqueue_add(feedback(2, "open"), None);
    queue.enqueue_delete(1, None);

    let cached: Vec<FeedbackItem> = cache.load(FEEDBACK_CACHE);
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, 2);

    let index: Vec<FeedbackIndexEntry> = cache.load(FEEDBACK_INDEX_CACHE);
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].id, 2);
  }

  #[tokio::test]
  async fn test_unauthorized_flush_keeps_queue_and_fires_hook() {
    let remote = Arc::new(FakeRemote::new());
    let cache = Arc::new(ScopedCache::new(MemoryStore::new()));
    let auth = Arc::new(AuthSignal::default());

    let fired = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&fired);
    auth.set_hook(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    let queue = DeltaQueue::new(Arc::clone(&remote), cache, auth);
    queue.enqueue_add(feedback(1, "open"), None);
    remote.script_batch(BatchReply::Fail(FakeFailure::Unauthorized));

    queue.flush().await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(queue.pending_count(), 1);
    // No auto-retry for auth failures.
    assert_eq!(remote.batch_call_count(), 1);
  }

  #[tokio::test]
  async fn test_clear_empties_queue_and_storage() {
    let remote = Arc::new(FakeRemote::new());
    let (cache, queue) = queue_with(remote);

    queue.enqueue_add(feedback(1, "open"), None);
    queue.clear();

    assert_eq!(queue.pending_count(), 0);
    let persisted: Vec<QueuedOperation> = cache.load(FEEDBACK_QUEUE);
    assert!(persisted.is_empty());
    assert_eq!(*queue.status().borrow(), SaveStatus::Saved);
  }

  #[tokio::test]
  async fn test_successful_flush_replaces_cached_index() {
    let remote = Arc::new(FakeRemote::new());
    let (cache, queue) = queue_with(Arc::clone(&remote));

    remote.script_batch(BatchReply::Outcome(BatchOutcome {
      success: true,
      processed: 1,
      total: 1,
      index: Some(vec![FeedbackIndexEntry { id: 41, status: "open".to_string() }]),
      errors: Vec::new(),
    }));

    queue.enqueue_add(feedback(41, "open"), None);
    queue.flush().await;

    let index: Vec<FeedbackIndexEntry> = cache.load(FEEDBACK_INDEX_CACHE);
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].id, 41);
  }
}
