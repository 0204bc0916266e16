//! Durable store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CollectionSchema, PENDING_INDEX};
use crate::error::{Error, Result};

/// Schema version stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

/// A record ready to be written: primary key, serialized body and index values.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
  pub key: String,
  pub data: Vec<u8>,
  pub indexes: Vec<(&'static str, String)>,
}

/// Trait for durable store backends.
///
/// Every method that writes more than one row runs in a single transaction.
pub trait DurableStore: Send + Sync {
  /// Whether writes survive the process. False for the no-op backend.
  fn is_persistent(&self) -> bool {
    true
  }

  fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>>;

  fn get_all(&self, collection: &str) -> Result<Vec<Vec<u8>>>;

  fn get_all_by_index(&self, collection: &str, index: &str, value: &str) -> Result<Vec<Vec<u8>>>;

  /// Upsert records by primary key.
  fn put_all(&self, collection: &str, records: &[StoredRecord]) -> Result<()>;

  fn delete(&self, collection: &str, key: &str) -> Result<()>;

  /// Remove `old_key` and upsert `record` as one step.
  fn swap(&self, collection: &str, old_key: &str, record: &StoredRecord) -> Result<()>;

  /// Remove a record and forget every loaded list of its collection, so the
  /// next read goes back to the remote.
  fn discard(&self, collection: &str, key: &str) -> Result<()>;

  /// Upsert the records of a list query and remember when it was loaded.
  fn store_query_result(
    &self,
    collection: &str,
    query_hash: &str,
    description: &str,
    records: &[StoredRecord],
  ) -> Result<()>;

  /// When a list query was last loaded from the remote.
  fn query_cached_at(&self, query_hash: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Store used when durable storage is unavailable or disabled.
/// Reads always miss and writes are discarded.
pub struct NoopStorage;

impl DurableStore for NoopStorage {
  fn is_persistent(&self) -> bool {
    false
  }

  fn get(&self, _collection: &str, _key: &str) -> Result<Option<Vec<u8>>> {
    Ok(None) // Always miss
  }

  fn get_all(&self, _collection: &str) -> Result<Vec<Vec<u8>>> {
    Ok(Vec::new())
  }

  fn get_all_by_index(
    &self,
    _collection: &str,
    _index: &str,
    _value: &str,
  ) -> Result<Vec<Vec<u8>>> {
    Ok(Vec::new())
  }

  fn put_all(&self, _collection: &str, _records: &[StoredRecord]) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _collection: &str, _key: &str) -> Result<()> {
    Ok(())
  }

  fn swap(&self, _collection: &str, _old_key: &str, _record: &StoredRecord) -> Result<()> {
    Ok(())
  }

  fn discard(&self, _collection: &str, _key: &str) -> Result<()> {
    Ok(())
  }

  fn store_query_result(
    &self,
    _collection: &str,
    _query_hash: &str,
    _description: &str,
    _records: &[StoredRecord],
  ) -> Result<()> {
    Ok(())
  }

  fn query_cached_at(&self, _query_hash: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(None)
  }
}

/// SQLite-based store implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  schema: &'static [CollectionSchema],
}

impl SqliteStorage {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path, schema: &'static [CollectionSchema]) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StorageUnavailable(format!(
          "failed to create cache directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StorageUnavailable(format!(
        "failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn, schema)
  }

  /// Open a store that lives only as long as this value.
  pub fn open_in_memory(schema: &'static [CollectionSchema]) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::StorageUnavailable(format!("failed to open in-memory cache: {}", e)))?;
    Self::with_connection(conn, schema)
  }

  fn with_connection(mut conn: Connection, schema: &'static [CollectionSchema]) -> Result<Self> {
    Self::run_migrations(&mut conn, schema)?;
    Ok(Self {
      conn: Mutex::new(conn),
      schema,
    })
  }

  /// Default database location.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::StorageUnavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("rrc").join("cache.db"))
  }

  /// Create the tables on first open, verify the declared collections afterwards.
  fn run_migrations(conn: &mut Connection, schema: &[CollectionSchema]) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    match version {
      0 => {
        let tx = conn.transaction()?;
        tx.execute_batch(STORE_SCHEMA)?;
        for collection in schema {
          tx.execute(
            "INSERT OR IGNORE INTO collection_indexes (collection, index_name) VALUES (?, '')",
            params![collection.name],
          )?;
          for index in collection.indexes {
            tx.execute(
              "INSERT OR IGNORE INTO collection_indexes (collection, index_name) VALUES (?, ?)",
              params![collection.name, index],
            )?;
          }
        }
        tx.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        tx.commit()?;
        Ok(())
      }
      SCHEMA_VERSION => Self::verify_schema(conn, schema),
      other => Err(Error::StorageUnavailable(format!(
        "cache schema version {} is not supported (expected {})",
        other, SCHEMA_VERSION
      ))),
    }
  }

  /// The declared collections are fixed for the life of a schema version.
  fn verify_schema(conn: &Connection, schema: &[CollectionSchema]) -> Result<()> {
    let mut stmt = conn.prepare(
      "SELECT collection, index_name FROM collection_indexes ORDER BY collection, index_name",
    )?;
    let stored: Vec<(String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<rusqlite::Result<_>>()?;

    let mut declared: Vec<(String, String)> = schema
      .iter()
      .flat_map(|c| {
        std::iter::once((c.name.to_string(), String::new()))
          .chain(c.indexes.iter().map(move |i| (c.name.to_string(), i.to_string())))
      })
      .collect();
    declared.sort();
    declared.dedup();

    if stored != declared {
      return Err(Error::StorageUnavailable(
        "cache collections differ from the declared schema".into(),
      ));
    }
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::StorageUnavailable(format!("lock poisoned: {}", e)))
  }

  fn collection(&self, name: &str) -> Result<&CollectionSchema> {
    self
      .schema
      .iter()
      .find(|c| c.name == name)
      .ok_or_else(|| Error::UnknownCollection(name.to_string()))
  }
}

/// Schema for store tables.
const STORE_SCHEMA: &str = r#"
-- Declared collections; index_name '' marks the collection itself
CREATE TABLE IF NOT EXISTS collection_indexes (
    collection TEXT NOT NULL,
    index_name TEXT NOT NULL,
    PRIMARY KEY (collection, index_name)
);

-- Records (stores serialized JSON)
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    record_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, record_key)
);

-- Secondary index entries
CREATE TABLE IF NOT EXISTS record_indexes (
    collection TEXT NOT NULL,
    index_name TEXT NOT NULL,
    index_value TEXT NOT NULL,
    record_key TEXT NOT NULL,
    PRIMARY KEY (collection, index_name, record_key)
);

CREATE INDEX IF NOT EXISTS idx_record_indexes_lookup
    ON record_indexes(collection, index_name, index_value);

-- List queries loaded from the remote
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_description TEXT NOT NULL,
    collection TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    result_count INTEGER NOT NULL
);
"#;

fn write_record(tx: &Transaction<'_>, collection: &CollectionSchema, record: &StoredRecord) -> Result<()> {
  if let Some((index, _)) = record.indexes.iter().find(|(i, _)| !collection.has_index(i)) {
    return Err(Error::UnknownIndex {
      collection: collection.name.to_string(),
      index: index.to_string(),
    });
  }

  tx.execute(
    "INSERT OR REPLACE INTO records (collection, record_key, data, cached_at)
     VALUES (?, ?, ?, datetime('now'))",
    params![collection.name, record.key, record.data],
  )?;
  tx.execute(
    "DELETE FROM record_indexes WHERE collection = ? AND record_key = ?",
    params![collection.name, record.key],
  )?;
  for (index, value) in &record.indexes {
    tx.execute(
      "INSERT OR REPLACE INTO record_indexes (collection, index_name, index_value, record_key)
       VALUES (?, ?, ?, ?)",
      params![collection.name, index, value, record.key],
    )?;
  }
  Ok(())
}

fn has_pending(tx: &Transaction<'_>, collection: &str, key: &str) -> Result<bool> {
  let pending: Option<String> = tx
    .query_row(
      "SELECT index_value FROM record_indexes
       WHERE collection = ? AND record_key = ? AND index_name = ?",
      params![collection, key, PENDING_INDEX],
      |row| row.get(0),
    )
    .optional()?;
  Ok(pending.as_deref() == Some("1"))
}

fn remove_record(tx: &Transaction<'_>, collection: &str, key: &str) -> Result<()> {
  tx.execute(
    "DELETE FROM record_indexes WHERE collection = ? AND record_key = ?",
    params![collection, key],
  )?;
  tx.execute(
    "DELETE FROM records WHERE collection = ? AND record_key = ?",
    params![collection, key],
  )?;
  Ok(())
}

impl DurableStore for SqliteStorage {
  fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
    let collection = self.collection(collection)?;
    let conn = self.lock()?;

    let data = conn
      .query_row(
        "SELECT data FROM records WHERE collection = ? AND record_key = ?",
        params![collection.name, key],
        |row| row.get(0),
      )
      .optional()?;

    Ok(data)
  }

  fn get_all(&self, collection: &str) -> Result<Vec<Vec<u8>>> {
    let collection = self.collection(collection)?;
    let conn = self.lock()?;

    let mut stmt =
      conn.prepare("SELECT data FROM records WHERE collection = ? ORDER BY record_key")?;
    let rows = stmt
      .query_map(params![collection.name], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;

    Ok(rows)
  }

  fn get_all_by_index(&self, collection: &str, index: &str, value: &str) -> Result<Vec<Vec<u8>>> {
    let collection = self.collection(collection)?;
    if !collection.has_index(index) {
      return Err(Error::UnknownIndex {
        collection: collection.name.to_string(),
        index: index.to_string(),
      });
    }
    let conn = self.lock()?;

    let mut stmt = conn.prepare(
      "SELECT r.data FROM records r
       INNER JOIN record_indexes i ON i.collection = r.collection AND i.record_key = r.record_key
       WHERE i.collection = ? AND i.index_name = ? AND i.index_value = ?
       ORDER BY r.record_key",
    )?;
    let rows = stmt
      .query_map(params![collection.name, index, value], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;

    Ok(rows)
  }

  fn put_all(&self, collection: &str, records: &[StoredRecord]) -> Result<()> {
    let collection = self.collection(collection)?;
    let mut conn = self.lock()?;

    let tx = conn.transaction()?;
    for record in records {
      write_record(&tx, collection, record)?;
    }
    tx.commit()?;

    Ok(())
  }

  fn delete(&self, collection: &str, key: &str) -> Result<()> {
    let collection = self.collection(collection)?;
    let mut conn = self.lock()?;

    let tx = conn.transaction()?;
    remove_record(&tx, collection.name, key)?;
    tx.commit()?;

    Ok(())
  }

  fn swap(&self, collection: &str, old_key: &str, record: &StoredRecord) -> Result<()> {
    let collection = self.collection(collection)?;
    let mut conn = self.lock()?;

    let tx = conn.transaction()?;
    if old_key != record.key {
      remove_record(&tx, collection.name, old_key)?;
    }
    write_record(&tx, collection, record)?;
    tx.commit()?;

    Ok(())
  }

  fn discard(&self, collection: &str, key: &str) -> Result<()> {
    let collection = self.collection(collection)?;
    let mut conn = self.lock()?;

    let tx = conn.transaction()?;
    remove_record(&tx, collection.name, key)?;
    tx.execute(
      "DELETE FROM query_cache WHERE collection = ?",
      params![collection.name],
    )?;
    tx.commit()?;

    Ok(())
  }

  fn store_query_result(
    &self,
    collection: &str,
    query_hash: &str,
    description: &str,
    records: &[StoredRecord],
  ) -> Result<()> {
    let collection = self.collection(collection)?;
    let mut conn = self.lock()?;

    let tx = conn.transaction()?;
    for record in records {
      // Remote copies never overwrite local changes still waiting for replay
      if !has_pending(&tx, collection.name, &record.key)? {
        write_record(&tx, collection, record)?;
      }
    }
    tx.execute(
      "INSERT OR REPLACE INTO query_cache (query_hash, query_description, collection, cached_at, result_count)
       VALUES (?, ?, ?, datetime('now'), ?)",
      params![query_hash, description, collection.name, records.len()],
    )?;
    tx.commit()?;

    Ok(())
  }

  fn query_cached_at(&self, query_hash: &str) -> Result<Option<DateTime<Utc>>> {
    let conn = self.lock()?;

    let cached_at: Option<String> = conn
      .query_row(
        "SELECT cached_at FROM query_cache WHERE query_hash = ?",
        params![query_hash],
        |row| row.get(0),
      )
      .optional()?;

    cached_at.as_deref().map(parse_datetime).transpose()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| Error::StorageUnavailable(format!("failed to parse datetime '{}': {}", s, e)))
}
