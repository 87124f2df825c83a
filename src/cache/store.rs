//! Durable local key/value storage trait and its backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, SyncError};

/// Trait for the durable key/value store backing the cache and the delta
/// queue. Values are opaque byte strings (serialized JSON in practice);
/// writes are always full-value overwrites.
pub trait LocalStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

  fn put(&self, key: &str, value: &[u8]) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;
}

/// SQLite-backed store, the durable default.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the key/value table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_cache (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Storage(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      SyncError::Storage(format!("failed to open cache database at {}: {}", path.display(), e))
    })?;

    let store = Self { conn: Mutex::new(conn) };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::Storage("could not determine data directory".to_string()))?;

    Ok(data_dir.join("tracksync").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| SyncError::Storage(format!("failed to run cache migrations: {}", e)))
  }
}

impl LocalStore for SqliteStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

    conn
      .query_row("SELECT value FROM kv_cache WHERE key = ?", params![key], |row| row.get(0))
      .optional()
      .map_err(|e| SyncError::Storage(format!("failed to read key {}: {}", key, e)))
  }

  fn put(&self, key: &str, value: &[u8]) -> Result<()> {
    let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_cache (key, value, stored_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| SyncError::Storage(format!("failed to write key {}: {}", key, e)))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

    conn
      .execute("DELETE FROM kv_cache WHERE key = ?", params![key])
      .map_err(|e| SyncError::Storage(format!("failed to remove key {}: {}", key, e)))?;

    Ok(())
  }
}

/// In-memory store. Used in tests and by hosts without durable storage,
/// where the cache degrades to a per-session optimization.
#[derive(Default)]
pub struct MemoryStore {
  map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl LocalStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
    Ok(map.get(key).cloned())
  }

  fn put(&self, key: &str, value: &[u8]) -> Result<()> {
    let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
    map.insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
    map.remove(key);
    Ok(())
  }
}
