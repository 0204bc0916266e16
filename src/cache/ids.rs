//! Synthetic ids for records the remote has not assigned an id to yet.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::traits::RecordId;

/// Prefix that keeps synthetic ids disjoint from canonical integer ids.
pub const SYNTHETIC_PREFIX: &str = "local-";

/// Generates `local-{nonce}-{counter}` ids.
///
/// The nonce is derived from the process id and start time, the counter is
/// monotonic, so ids never repeat within a process and are very unlikely to
/// repeat across restarts.
#[derive(Debug)]
pub struct SyntheticIdGenerator {
  nonce: String,
  next: AtomicU64,
}

impl SyntheticIdGenerator {
  pub fn new() -> Self {
    let started = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_nanos();

    let mut hasher = Sha256::new();
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(started.to_le_bytes());
    let digest = hex::encode(hasher.finalize());

    Self::with_nonce(&digest[..12])
  }

  pub fn with_nonce(nonce: &str) -> Self {
    Self {
      nonce: nonce.to_string(),
      next: AtomicU64::new(1),
    }
  }

  pub fn next_id(&self) -> RecordId {
    let n = self.next.fetch_add(1, Ordering::Relaxed);
    RecordId::Synthetic(format!("{}{}-{}", SYNTHETIC_PREFIX, self.nonce, n))
  }
}

impl Default for SyntheticIdGenerator {
  fn default() -> Self {
    Self::new()
  }
}
