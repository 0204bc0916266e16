//! Generic offline-first caching layer.
//!
//! This module knows nothing about restaurants. It provides:
//! - A durable, indexed, transactional store with a no-op fallback
//! - Read-through caching of lists and single records
//! - A pending-write queue with reconciliation against the remote
//! - Synthetic ids for records the remote has not assigned an id to yet

mod gateway;
mod handle;
mod ids;
mod layer;
mod query;
mod reconcile;
mod storage;
mod traits;

pub use gateway::{AllowedMethods, Gateway};
pub use handle::{LocalStore, StoreHandle, StoreLocation};
pub use ids::{SyntheticIdGenerator, SYNTHETIC_PREFIX};
pub use layer::CacheLayer;
pub use query::{ListQuery, Scope};
pub use reconcile::{PendingWrite, ReconcileReport, Reconciler};
pub use storage::{DurableStore, NoopStorage, SqliteStorage, StoredRecord};
pub use traits::{
  CacheResult, CacheSource, CollectionSchema, QueryKey, Record, RecordId, PENDING_INDEX,
};
