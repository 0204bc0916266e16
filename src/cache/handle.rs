//! Owned, lazily opened store and the typed handle used by the other layers.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::storage::{DurableStore, NoopStorage, SqliteStorage, StoredRecord};
use super::traits::{CollectionSchema, QueryKey, Record, RecordId, PENDING_INDEX};
use crate::error::Result;

/// Where the durable store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
  /// `$XDG_DATA_HOME/rrc/cache.db`
  Default,
  Path(PathBuf),
  /// Private in-memory database, gone when the store is closed
  InMemory,
  /// Persistence switched off; every operation is a no-op
  Disabled,
}

/// The durable store, opened on first use.
///
/// `open` may be called any number of times and from concurrent tasks; the
/// connection is made once. If the store cannot be opened the handle falls
/// back to a no-op backend instead of failing.
pub struct LocalStore {
  location: StoreLocation,
  schema: &'static [CollectionSchema],
  handle: OnceCell<StoreHandle>,
}

impl LocalStore {
  pub fn new(location: StoreLocation, schema: &'static [CollectionSchema]) -> Self {
    Self {
      location,
      schema,
      handle: OnceCell::new(),
    }
  }

  pub async fn open(&self) -> &StoreHandle {
    self
      .handle
      .get_or_init(|| async { self.connect() })
      .await
  }

  /// Drop the connection. The next `open` reconnects.
  pub fn close(&mut self) {
    if self.handle.take().is_some() {
      debug!(location = ?self.location, "closed local store");
    }
  }

  fn connect(&self) -> StoreHandle {
    let opened = match &self.location {
      StoreLocation::Disabled => {
        info!("local store disabled, running without persistence");
        return StoreHandle::new(NoopStorage);
      }
      StoreLocation::InMemory => SqliteStorage::open_in_memory(self.schema),
      StoreLocation::Default => {
        SqliteStorage::default_path().and_then(|path| SqliteStorage::open(&path, self.schema))
      }
      StoreLocation::Path(path) => SqliteStorage::open(path, self.schema),
    };

    match opened {
      Ok(storage) => {
        debug!(location = ?self.location, "opened local store");
        StoreHandle::new(storage)
      }
      Err(e) => {
        warn!(error = %e, "local store unavailable, running without persistence");
        StoreHandle::new(NoopStorage)
      }
    }
  }
}

/// Typed access to a durable store backend. Cheap to clone.
#[derive(Clone)]
pub struct StoreHandle {
  backend: Arc<dyn DurableStore>,
}

impl StoreHandle {
  pub fn new(backend: impl DurableStore + 'static) -> Self {
    Self {
      backend: Arc::new(backend),
    }
  }

  pub fn is_persistent(&self) -> bool {
    self.backend.is_persistent()
  }

  pub fn get<T: Record>(&self, id: &RecordId) -> Result<Option<T>> {
    match self.backend.get(T::collection(), &id.key())? {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  pub fn get_all<T: Record>(&self) -> Result<Vec<T>> {
    Ok(decode_rows(T::collection(), self.backend.get_all(T::collection())?))
  }

  pub fn get_all_by_index<T: Record>(&self, index: &str, value: &str) -> Result<Vec<T>> {
    let rows = self
      .backend
      .get_all_by_index(T::collection(), index, value)?;
    Ok(decode_rows(T::collection(), rows))
  }

  /// Records written locally and not yet confirmed by the remote.
  pub fn get_pending<T: Record>(&self) -> Result<Vec<T>> {
    self.get_all_by_index(PENDING_INDEX, "1")
  }

  pub fn put<T: Record>(&self, record: &T) -> Result<()> {
    self.put_all(std::slice::from_ref(record))
  }

  pub fn put_all<T: Record>(&self, records: &[T]) -> Result<()> {
    let stored = records.iter().map(encode).collect::<Result<Vec<_>>>()?;
    self.backend.put_all(T::collection(), &stored)
  }

  pub fn delete<T: Record>(&self, id: &RecordId) -> Result<()> {
    self.backend.delete(T::collection(), &id.key())
  }

  /// Replace the record stored under `old_id` with `record`.
  pub fn swap<T: Record>(&self, old_id: &RecordId, record: &T) -> Result<()> {
    self
      .backend
      .swap(T::collection(), &old_id.key(), &encode(record)?)
  }

  /// Drop a record the remote will never accept, and the lists that held it.
  pub fn discard<T: Record>(&self, id: &RecordId) -> Result<()> {
    self.backend.discard(T::collection(), &id.key())
  }

  pub fn store_query_result<T: Record>(&self, query: &impl QueryKey, records: &[T]) -> Result<()> {
    let stored = records.iter().map(encode).collect::<Result<Vec<_>>>()?;
    self.backend.store_query_result(
      T::collection(),
      &query.cache_hash(),
      &query.description(),
      &stored,
    )
  }

  pub fn query_cached_at(&self, query: &impl QueryKey) -> Result<Option<DateTime<Utc>>> {
    self.backend.query_cached_at(&query.cache_hash())
  }
}

fn encode<T: Record>(record: &T) -> Result<StoredRecord> {
  let mut indexes = record.index_values();
  indexes.push((
    PENDING_INDEX,
    if record.is_pending() { "1" } else { "0" }.to_string(),
  ));

  Ok(StoredRecord {
    key: record.id().key(),
    data: serde_json::to_vec(record)?,
    indexes,
  })
}

/// Rows that no longer decode are skipped rather than failing the whole read.
fn decode_rows<T: Record>(collection: &str, rows: Vec<Vec<u8>>) -> Vec<T> {
  rows
    .into_iter()
    .filter_map(|data| match serde_json::from_slice(&data) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!(collection, error = %e, "skipping undecodable record");
        None
      }
    })
    .collect()
}
