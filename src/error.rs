//! Failure taxonomy for remote and local storage operations.

use std::time::Duration;

/// Errors surfaced by the sync core.
///
/// Not-found is deliberately absent: a missing remote key is a valid
/// "no value yet" result (`Ok(None)`), not a failure. Partial batch
/// failures are data on [`crate::remote::BatchOutcome`], not an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// HTTP 401. Fatal to the current session; never retried locally.
  #[error("unauthorized - session is no longer valid")]
  Unauthorized,

  /// No response within the configured duration. The underlying transfer
  /// is aborted when this fires.
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  /// Any other non-success HTTP status.
  #[error("request failed with status {0}")]
  RequestFailed(u16),

  /// Connection-level failure (DNS, refused, reset, TLS).
  #[error("transport error: {0}")]
  Transport(String),

  /// The server answered 2xx but the body was not what we expect.
  #[error("unexpected response body: {0}")]
  BadResponse(String),

  /// Local persistence failed. Callers degrade to memory-only.
  #[error("local storage error: {0}")]
  Storage(String),
}

impl SyncError {
  /// Transient failures are worth retrying with backoff; everything else
  /// is either fatal (auth) or a programming/contract problem.
  pub fn is_transient(&self) -> bool {
    match self {
      SyncError::Timeout(_) | SyncError::Transport(_) => true,
      SyncError::RequestFailed(status) => *status >= 500,
      _ => false,
    }
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
