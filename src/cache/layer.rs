//! Read-through cache layer that orchestrates the local store and network fetching.

use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::handle::{LocalStore, StoreHandle};
use super::query::{ListQuery, Scope};
use super::traits::{CacheResult, QueryKey, Record, RecordId};
use crate::error::{Error, Result};

/// Cache layer that manages read-through caching and network fetching.
///
/// This layer sits between the facade and the remote gateway. Storage
/// failures are logged and treated as misses; they never fail a read whose
/// remote leg succeeded.
pub struct CacheLayer {
  store: Arc<LocalStore>,
  /// How long a loaded list stays authoritative. `None` means forever.
  stale_time: Option<Duration>,
}

impl CacheLayer {
  pub fn new(store: Arc<LocalStore>) -> Self {
    Self {
      store,
      stale_time: None,
    }
  }

  /// Refresh list queries older than `stale_time` from the network.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }

  fn is_stale(&self, cached_at: DateTime<Utc>) -> bool {
    self
      .stale_time
      .is_some_and(|stale_time| Utc::now() - cached_at > stale_time)
  }

  /// Whether the underlying store keeps what it is given.
  pub async fn is_persistent(&self) -> bool {
    self.store.open().await.is_persistent()
  }

  /// Fetch a list with cache-first strategy.
  ///
  /// 1. If the query was loaded before and is not stale, serve the local scope
  /// 2. Otherwise fetch from network once, store results and the query mark
  /// 3. On network failure, serve whatever the local scope holds (offline mode)
  ///
  /// After a network fetch the local scope is returned, so records written
  /// locally and still pending are included.
  pub async fn fetch_list<T, F, Fut>(
    &self,
    query: &ListQuery,
    fetcher: F,
  ) -> Result<CacheResult<Vec<T>>>
  where
    T: Record,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    let store = self.store.open().await;

    let cached_at = store.query_cached_at(query).unwrap_or_else(|e| {
      warn!(query = %query.description(), error = %e, "failed to read query cache");
      None
    });

    if let Some(cached_at) = cached_at {
      if !self.is_stale(cached_at) {
        match read_scope(store, query) {
          Ok(data) => {
            debug!(query = %query.description(), count = data.len(), "serving list from local store");
            return Ok(CacheResult::from_cache(data));
          }
          Err(e) => {
            warn!(query = %query.description(), error = %e, "local read failed, fetching from network");
          }
        }
      }
    }

    match fetcher().await {
      Ok(data) => {
        if let Err(e) = store.store_query_result(query, &data) {
          warn!(query = %query.description(), error = %e, "failed to cache list");
          return Ok(CacheResult::from_network(data));
        }
        if !store.is_persistent() {
          return Ok(CacheResult::from_network(data));
        }

        match read_scope(store, query) {
          Ok(local) => Ok(CacheResult::from_network(local)),
          Err(e) => {
            warn!(query = %query.description(), error = %e, "failed to re-read cached list");
            Ok(CacheResult::from_network(data))
          }
        }
      }
      Err(e) if e.is_recoverable() => {
        let local = read_scope(store, query).unwrap_or_else(|read_err| {
          warn!(query = %query.description(), error = %read_err, "local read failed");
          Vec::new()
        });

        // Nothing was ever loaded and nothing was written locally
        if local.is_empty() && cached_at.is_none() {
          return Err(e);
        }

        info!(query = %query.description(), error = %e, "remote unavailable, serving local data");
        Ok(CacheResult::offline(local))
      }
      Err(e) => Err(e),
    }
  }

  /// Fetch a single record, going to the network only on a local miss.
  ///
  /// A miss makes exactly one remote round-trip. A remote `NotFound` is
  /// returned as is and nothing is written.
  pub async fn fetch_one<T, F, Fut>(&self, id: &RecordId, fetcher: F) -> Result<CacheResult<T>>
  where
    T: Record,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let store = self.store.open().await;

    match store.get::<T>(id) {
      Ok(Some(record)) => {
        debug!(collection = T::collection(), %id, "serving record from local store");
        return Ok(CacheResult::from_cache(record));
      }
      Ok(None) => {}
      Err(e) => {
        warn!(collection = T::collection(), %id, error = %e, "local read failed, fetching from network");
      }
    }

    let record = fetcher().await?;
    if let Err(e) = store.put(&record) {
      warn!(collection = T::collection(), %id, error = %e, "failed to cache record");
    }

    Ok(CacheResult::from_network(record))
  }

  /// Serve an index lookup from the local store only.
  ///
  /// Callers warm the store with `fetch_list` first.
  pub async fn fetch_by_index<T: Record>(&self, index: &str, value: &str) -> Result<Vec<T>> {
    let store = self.store.open().await;

    match store.get_all_by_index(index, value) {
      Ok(records) => Ok(records),
      Err(e @ (Error::UnknownIndex { .. } | Error::UnknownCollection(_))) => Err(e),
      Err(e) => {
        warn!(collection = T::collection(), index, error = %e, "local index read failed");
        Ok(Vec::new())
      }
    }
  }
}

fn read_scope<T: Record>(store: &StoreHandle, query: &ListQuery) -> Result<Vec<T>> {
  match &query.scope {
    Scope::All => store.get_all(),
    Scope::Index { index, value } => store.get_all_by_index(index, value),
  }
}
