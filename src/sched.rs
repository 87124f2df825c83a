//! Debounced scheduling: run a task after a delay unless superseded.
//!
//! One primitive covers every deferred action in the sync core - debounced
//! queue persistence, debounced flush scheduling, and backoff retries.
//! Scheduling again before the pending task fires aborts it and starts the
//! clock over, so a burst of edits collapses into a single persist and a
//! single flush.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A single debounced slot. At most one scheduled task is pending at a
/// time; a newer `schedule` call supersedes an older one that has not
/// fired yet.
#[derive(Default)]
pub struct Debounced {
  pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debounced {
  pub fn new() -> Self {
    Self { pending: Mutex::new(None) }
  }

  /// Run `task` after `delay`, unless another `schedule` or `cancel`
  /// happens first.
  pub fn schedule<F>(&self, delay: Duration, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      task.await;
    });

    let mut slot = self.pending.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(previous) = slot.replace(handle) {
      previous.abort();
    }
  }

  /// Abort the pending task, if any.
  pub fn cancel(&self) {
    let mut slot = self.pending.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(previous) = slot.take() {
      previous.abort();
    }
  }

  /// Whether a scheduled task has not fired yet.
  pub fn is_pending(&self) -> bool {
    let slot = self.pending.lock().unwrap_or_else(|e| e.into_inner());
    slot.as_ref().is_some_and(|h| !h.is_finished())
  }
}

impl Drop for Debounced {
  fn drop(&mut self) {
    self.cancel();
  }
}
