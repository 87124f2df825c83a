//! The sync engine: one value owning every piece of sync state.
//!
//! The engine wires the remote client, the scoped cache, the entity loader
//! and the delta queue together, with all dependencies injected so tests
//! (and hosts embedding more than one account) can run multiple
//! independent instances side by side.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::cache::{LocalStore, ScopedCache, SqliteStore};
use crate::error::Result;
use crate::loader::{EntityLoader, LoadOptions, LoadResult};
use crate::queue::{DeltaQueue, ErrorCallback, SaveStatus};
use crate::remote::{HttpRemoteStore, RemoteConfig, RemoteStore};
use crate::types::FeedbackItem;

/// Hook fired when any remote operation answers 401. The host redirects to
/// login; the core never retries an unauthorized request.
#[derive(Default)]
pub struct AuthSignal {
  hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl AuthSignal {
  pub fn set_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
    let mut slot = self.hook.lock().unwrap_or_else(|e| e.into_inner());
    *slot = Some(Box::new(hook));
  }

  pub(crate) fn fire(&self) {
    let slot = self.hook.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(hook) = slot.as_ref() {
      hook();
    }
  }
}

/// Owns the full sync state for one account session.
pub struct SyncEngine<R: RemoteStore, S: LocalStore + 'static> {
  cache: Arc<ScopedCache<S>>,
  auth: Arc<AuthSignal>,
  loader: EntityLoader<R, S>,
  queue: Arc<DeltaQueue<R, S>>,
}

impl SyncEngine<HttpRemoteStore, SqliteStore> {
  /// Production wiring: HTTP remote store, SQLite-backed cache at the
  /// default location, cache scoped to the configured credential.
  pub fn open(config: RemoteConfig) -> Result<Self> {
    let credential = config.credential.clone();
    let remote = HttpRemoteStore::new(config)?;
    let store = SqliteStore::open()?;

    let engine = Self::with_parts(remote, store);
    engine.set_credential(credential);
    Ok(engine)
  }
}

impl<R: RemoteStore, S: LocalStore + 'static> SyncEngine<R, S> {
  /// Assemble an engine from explicit parts.
  pub fn with_parts(remote: R, store: S) -> Self {
    let remote = Arc::new(remote);
    let cache = Arc::new(ScopedCache::new(store));
    let auth = Arc::new(AuthSignal::default());
    let loader = EntityLoader::new(Arc::clone(&remote), Arc::clone(&cache), Arc::clone(&auth));
    let queue = DeltaQueue::new(remote, Arc::clone(&cache), Arc::clone(&auth));

    Self { cache, auth, loader, queue }
  }

  /// Switch the cache scope to a (new) credential. Entries cached under
  /// the previous credential stay where they are, unreachable from the new
  /// scope.
  pub fn set_credential(&self, credential: Option<String>) {
    self.cache.set_credential(credential);
  }

  /// Register the redirect-to-login hook.
  pub fn on_unauthorized(&self, hook: impl Fn() + Send + Sync + 'static) {
    self.auth.set_hook(hook);
  }

  /// Load all collections; see [`EntityLoader::load_all`].
  pub async fn load_all(&self, options: LoadOptions) -> LoadResult {
    self.loader.load_all(options).await
  }

  pub fn enqueue_add(&self, item: FeedbackItem, on_error: Option<ErrorCallback>) -> String {
    self.queue.enqueue_add(item, on_error)
  }

  pub fn enqueue_update(&self, item: FeedbackItem, on_error: Option<ErrorCallback>) -> String {
    self.queue.enqueue_update(item, on_error)
  }

  pub fn enqueue_delete(&self, id: i64, on_error: Option<ErrorCallback>) -> String {
    self.queue.enqueue_delete(id, on_error)
  }

  pub async fn flush(&self) {
    self.queue.flush().await
  }

  pub fn save_status(&self) -> watch::Receiver<SaveStatus> {
    self.queue.status()
  }

  pub fn has_unsaved(&self) -> bool {
    self.queue.has_unsaved()
  }

  pub fn set_online(&self, online: bool) {
    self.queue.set_online(online)
  }

  pub fn cache(&self) -> &ScopedCache<S> {
    &self.cache
  }

  pub fn queue(&self) -> &Arc<DeltaQueue<R, S>> {
    &self.queue
  }
}
