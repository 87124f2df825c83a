//! Local-first synchronization core for a task/project tracker.
//!
//! The crate decides what data to show immediately, when to trust the
//! local cache versus the network, and how to queue and retry local
//! mutations against a remote key/value store without losing or
//! duplicating them. The host application supplies the views, the auth
//! flow, and a tokio runtime; this crate supplies:
//!
//! - [`engine::SyncEngine`] - one value owning the whole sync state,
//!   constructed with its dependencies injected;
//! - [`loader::EntityLoader`] - cache-first loading with background
//!   reconciliation and fingerprint-gated refresh callbacks;
//! - [`queue::DeltaQueue`] - a durable, ordered buffer of local feedback
//!   mutations with batched flushes and bounded-backoff retry;
//! - [`fingerprint`] - cheap lossy change signatures that keep background
//!   polls from re-rendering anything that didn't change.

pub mod cache;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod loader;
pub mod merge;
pub mod queue;
pub mod remote;
pub mod sched;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use loader::{LoadOptions, LoadResult, LoadSource};
pub use queue::{DeltaQueue, QueuedOperation, SaveStatus};
pub use remote::RemoteConfig;
pub use types::{Dataset, FeedbackIndexEntry, FeedbackItem, Project, Task};
