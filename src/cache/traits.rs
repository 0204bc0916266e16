//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Name of the index every collection carries for unconfirmed writes.
pub const PENDING_INDEX: &str = "pending";

/// Primary key of a stored record.
///
/// Canonical ids are assigned by the remote; synthetic ids are generated
/// locally for writes the remote has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
  Canonical(u64),
  Synthetic(String),
}

impl RecordId {
  /// Key used by the store.
  pub fn key(&self) -> String {
    match self {
      RecordId::Canonical(id) => id.to_string(),
      RecordId::Synthetic(id) => id.clone(),
    }
  }

  pub fn is_synthetic(&self) -> bool {
    matches!(self, RecordId::Synthetic(_))
  }

  pub fn canonical(&self) -> Option<u64> {
    match self {
      RecordId::Canonical(id) => Some(*id),
      RecordId::Synthetic(_) => None,
    }
  }
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecordId::Canonical(id) => f.pad(&id.to_string()),
      RecordId::Synthetic(id) => f.pad(id),
    }
  }
}

impl From<u64> for RecordId {
  fn from(id: u64) -> Self {
    RecordId::Canonical(id)
  }
}

/// Trait for records that can live in the durable store.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Collection the record belongs to (e.g., "restaurants").
  fn collection() -> &'static str;

  fn id(&self) -> &RecordId;

  /// Values for the secondary indexes declared by the collection.
  /// The pending index is maintained by the store and must not be listed here.
  fn index_values(&self) -> Vec<(&'static str, String)>;

  fn is_pending(&self) -> bool;

  fn set_pending(&mut self, pending: bool);
}

/// Declaration of one collection and its secondary indexes.
#[derive(Debug, Clone, Copy)]
pub struct CollectionSchema {
  pub name: &'static str,
  pub indexes: &'static [&'static str],
}

impl CollectionSchema {
  /// Whether `index` can be queried on this collection.
  pub fn has_index(&self, index: &str) -> bool {
    index == PENDING_INDEX || self.indexes.contains(&index)
  }
}

/// Key identifying a cached list query.
pub trait QueryKey {
  /// Stable, fixed-length hash used as the storage key.
  fn cache_hash(&self) -> String;

  /// Human readable description for logs.
  fn description(&self) -> String;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  /// Remote unreachable, serving whatever the store holds.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from the local store
  Cache,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}
