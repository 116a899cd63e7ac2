//! Durable storage for the catalog cache record.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::catalog::CacheRecord;

/// Single key under which the catalog record is stored.
const STORE_KEY: &str = "offer_catalog";

/// Trait for cache record storage backends.
///
/// Persistence is best-effort: `read` treats malformed data as absent, and
/// `write`/`clear` swallow failures, so orchestration never stalls on
/// storage trouble.
pub trait CatalogStore: Send + Sync {
  /// Get the stored record, if a well-formed one exists.
  fn read(&self) -> Option<CacheRecord>;

  /// Persist the record, replacing any previous one.
  fn write(&self, record: &CacheRecord);

  /// Remove the record entirely.
  fn clear(&self);
}

/// SQLite-backed store holding the single catalog record.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the record table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS catalog_cache (
    key TEXT PRIMARY KEY,
    record BLOB NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStore {
  /// Create a new SQLite store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Create a new SQLite store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Create a store backed by an in-memory database.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offersync").join("cache.db"))
  }

  /// Run database migrations for the record table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CatalogStore for SqliteStore {
  fn read(&self) -> Option<CacheRecord> {
    let conn = self.conn.lock().ok()?;

    let data: Vec<u8> = conn
      .query_row(
        "SELECT record FROM catalog_cache WHERE key = ?",
        params![STORE_KEY],
        |row| row.get(0),
      )
      .optional()
      .ok()
      .flatten()?;

    match serde_json::from_slice(&data) {
      Ok(record) => Some(record),
      Err(e) => {
        debug!("discarding malformed cache record: {}", e);
        None
      }
    }
  }

  fn write(&self, record: &CacheRecord) {
    let data = match serde_json::to_vec(record) {
      Ok(data) => data,
      Err(e) => {
        warn!("failed to serialize cache record: {}", e);
        return;
      }
    };

    let Ok(conn) = self.conn.lock() else {
      warn!("cache store lock poisoned; dropping write");
      return;
    };

    if let Err(e) = conn.execute(
      "INSERT OR REPLACE INTO catalog_cache (key, record, written_at)
       VALUES (?, ?, datetime('now'))",
      params![STORE_KEY, data],
    ) {
      warn!("failed to persist cache record: {}", e);
    }
  }

  fn clear(&self) {
    let Ok(conn) = self.conn.lock() else {
      return;
    };

    if let Err(e) = conn.execute(
      "DELETE FROM catalog_cache WHERE key = ?",
      params![STORE_KEY],
    ) {
      warn!("failed to clear cache record: {}", e);
    }
  }
}

/// In-memory store used by tests and short-lived embeddings.
#[derive(Default)]
#[allow(dead_code)]
pub struct MemoryStore {
  record: Mutex<Option<CacheRecord>>,
}

impl CatalogStore for MemoryStore {
  fn read(&self) -> Option<CacheRecord> {
    self.record.lock().ok()?.clone()
  }

  fn write(&self, record: &CacheRecord) {
    if let Ok(mut slot) = self.record.lock() {
      *slot = Some(record.clone());
    }
  }

  fn clear(&self) {
    if let Ok(mut slot) = self.record.lock() {
      *slot = None;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::{Catalog, Offer};

  fn sample_record() -> CacheRecord {
    let mut payload = Catalog::new();
    payload.insert(
      "PROMO10".to_string(),
      Offer {
        label: "Promo 10".to_string(),
        desc: vec!["5GB extra".to_string()],
      },
    );

    CacheRecord {
      validator_tag: Some("\"v1\"".to_string()),
      validator_timestamp: Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
      fetched_at: 1_700_000_000_000,
      payload,
    }
  }

  #[test]
  fn test_sqlite_round_trip() {
    let store = SqliteStore::open_in_memory().unwrap();
    let record = sample_record();

    store.write(&record);
    assert_eq!(store.read(), Some(record));
  }

  #[test]
  fn test_write_replaces_previous_record() {
    let store = SqliteStore::open_in_memory().unwrap();
    let first = sample_record();
    store.write(&first);

    let mut second = sample_record();
    second.validator_tag = Some("\"v2\"".to_string());
    second.fetched_at = first.fetched_at + 1;
    store.write(&second);

    assert_eq!(store.read(), Some(second));
  }

  #[test]
  fn test_missing_record_reads_as_absent() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.read().is_none());
  }

  #[test]
  fn test_malformed_record_reads_as_absent() {
    let store = SqliteStore::open_in_memory().unwrap();
    {
      let conn = store.conn.lock().unwrap();
      conn
        .execute(
          "INSERT INTO catalog_cache (key, record) VALUES (?, ?)",
          params![STORE_KEY, b"not json".to_vec()],
        )
        .unwrap();
    }

    assert!(store.read().is_none());
  }

  #[test]
  fn test_clear_removes_record() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.write(&sample_record());
    store.clear();

    assert!(store.read().is_none());
  }

  #[test]
  fn test_memory_store_round_trip() {
    let store = MemoryStore::default();
    let record = sample_record();

    store.write(&record);
    assert_eq!(store.read(), Some(record));

    store.clear();
    assert!(store.read().is_none());
  }
}
