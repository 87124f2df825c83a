//! Persistent local mirror of the remote store.
//!
//! Two layers: a [`LocalStore`] key/value backend (SQLite by default, an
//! in-memory fallback for tests and storage-less hosts) and the
//! credential-scoped [`ScopedCache`] the rest of the core talks to.

mod scoped;
mod store;

pub use scoped::{
  ScopedCache, FEEDBACK_CACHE, FEEDBACK_INDEX_CACHE, FEEDBACK_QUEUE, PROJECTS_CACHE, TASKS_CACHE,
};
pub use store::{LocalStore, MemoryStore, SqliteStore};
