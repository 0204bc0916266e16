//! Pending-write queue: local writes the remote has not confirmed yet, and
//! the reconciler that replays them.
//!
//! A logical write moves through three states:
//!
//! - local pending: stored with `pending = true` (and a synthetic id for creates)
//! - reconciling: being replayed against the remote
//! - confirmed: the canonical record replaced the pending one
//!
//! A replay that can't reach the remote leaves the record pending for the
//! next pass. There is no retry cap and no backoff; a pass runs whenever the
//! facade reads the collection. A replay the remote rejects is dropped, since
//! sending the same payload again would be rejected again.
//!
//! A record being replayed is claimed for the duration of the replay, so
//! overlapping passes never send the same write twice.

use futures::future::join_all;
use reqwest::Method;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::gateway::Gateway;
use super::handle::{LocalStore, StoreHandle};
use super::traits::{Record, RecordId};
use crate::error::{Error, Result};

/// A record whose local changes can be replayed against the remote.
pub trait PendingWrite: Record {
  /// Method the remote must permit for the replay.
  fn write_method() -> Method;

  /// Resource probed before the replay.
  fn probe_path(&self) -> String;

  /// Send the change and return the canonical record. The payload never
  /// carries a synthetic id or the pending flag.
  fn replay<G: Gateway>(&self, gateway: &G) -> impl Future<Output = Result<Self>> + Send;
}

/// Outcome of one reconciliation pass over a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
  /// Replaced by their canonical records
  pub confirmed: usize,
  /// Remote still unreachable; retried next pass
  pub pending: usize,
  /// Refused by the remote and dropped from the local store
  pub rejected: usize,
}

impl ReconcileReport {
  pub fn is_empty(&self) -> bool {
    self.confirmed + self.pending + self.rejected == 0
  }
}

impl std::ops::Add for ReconcileReport {
  type Output = Self;

  fn add(self, other: Self) -> Self {
    Self {
      confirmed: self.confirmed + other.confirmed,
      pending: self.pending + other.pending,
      rejected: self.rejected + other.rejected,
    }
  }
}

enum Outcome {
  Confirmed,
  Pending,
  Rejected,
}

/// Claim on a record under replay, released on drop.
struct InFlight<'a> {
  claims: &'a Mutex<HashSet<String>>,
  key: String,
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self
      .claims
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(&self.key);
  }
}

/// Writes through to the remote when it can, queues locally when it can't,
/// and replays the queue later.
pub struct Reconciler<G> {
  store: Arc<LocalStore>,
  gateway: Arc<G>,
  /// `collection/key` of every record currently being replayed
  in_flight: Mutex<HashSet<String>>,
}

impl<G: Gateway> Reconciler<G> {
  pub fn new(store: Arc<LocalStore>, gateway: Arc<G>) -> Self {
    Self {
      store,
      gateway,
      in_flight: Mutex::new(HashSet::new()),
    }
  }

  /// Claim `id` for replay. `None` if another pass already holds it.
  fn claim<T: Record>(&self, id: &RecordId) -> Option<InFlight<'_>> {
    let key = format!("{}/{}", T::collection(), id.key());
    let mut claims = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
    if !claims.insert(key.clone()) {
      return None;
    }
    Some(InFlight {
      claims: &self.in_flight,
      key,
    })
  }

  /// Write `draft` to the remote, or keep it locally as pending.
  ///
  /// On success the canonical record replaces the draft in the store and is
  /// returned. If the remote is unreachable, or the probe does not permit the
  /// write, the draft is stored with `pending = true` and returned. Any other
  /// error (e.g. a rejection) is returned and nothing is queued.
  pub async fn write<T: PendingWrite>(&self, mut draft: T) -> Result<T> {
    let store = self.store.open().await;

    match self.attempt(&draft).await {
      Ok(canonical) => {
        if let Err(e) = store.swap(draft.id(), &canonical) {
          warn!(collection = T::collection(), id = %canonical.id(), error = %e, "failed to cache confirmed write");
        }
        Ok(canonical)
      }
      Err(Error::RemoteUnavailable(reason)) => {
        draft.set_pending(true);
        if !store.is_persistent() {
          warn!(collection = T::collection(), id = %draft.id(), "no local store, pending write will not survive");
        }
        if let Err(e) = store.put(&draft) {
          warn!(collection = T::collection(), id = %draft.id(), error = %e, "failed to queue pending write");
        }
        info!(collection = T::collection(), id = %draft.id(), %reason, "remote unavailable, write queued");
        Ok(draft)
      }
      Err(e) => Err(e),
    }
  }

  /// Replay every pending record of `T`'s collection once.
  ///
  /// Never fails: problems are logged and counted in the report. With no
  /// pending records no remote call is made. Records another pass is already
  /// replaying are skipped and not counted.
  pub async fn reconcile<T: PendingWrite>(&self) -> ReconcileReport {
    let store = self.store.open().await;

    let pending = match store.get_pending::<T>() {
      Ok(pending) => pending,
      Err(e) => {
        warn!(collection = T::collection(), error = %e, "failed to read pending writes");
        return ReconcileReport::default();
      }
    };
    if pending.is_empty() {
      return ReconcileReport::default();
    }

    debug!(collection = T::collection(), count = pending.len(), "replaying pending writes");

    // Independent records, so no ordering between them
    let outcomes = join_all(pending.iter().map(|record| self.confirm(store, record))).await;

    let report = outcomes
      .into_iter()
      .flatten()
      .fold(ReconcileReport::default(), |mut report, outcome| {
        match outcome {
          Outcome::Confirmed => report.confirmed += 1,
          Outcome::Pending => report.pending += 1,
          Outcome::Rejected => report.rejected += 1,
        }
        report
      });

    info!(
      collection = T::collection(),
      confirmed = report.confirmed,
      pending = report.pending,
      rejected = report.rejected,
      "reconciliation pass finished"
    );
    report
  }

  async fn confirm<T: PendingWrite>(&self, store: &StoreHandle, record: &T) -> Option<Outcome> {
    let Some(_claim) = self.claim::<T>(record.id()) else {
      debug!(collection = T::collection(), id = %record.id(), "already being replayed");
      return None;
    };

    // An earlier pass may have confirmed or replaced it since the pending list was read
    let record = match store.get::<T>(record.id()) {
      Ok(Some(current)) if current.is_pending() => current,
      Ok(_) => return None,
      Err(e) => {
        warn!(collection = T::collection(), id = %record.id(), error = %e, "failed to re-read pending write");
        return Some(Outcome::Pending);
      }
    };
    let record = &record;

    let outcome = match self.attempt(record).await {
      Ok(canonical) => match store.swap(record.id(), &canonical) {
        Ok(()) => {
          debug!(collection = T::collection(), from = %record.id(), to = %canonical.id(), "pending write confirmed");
          Outcome::Confirmed
        }
        Err(e) => {
          // The remote has it; the next pass replays the same change again
          warn!(collection = T::collection(), id = %record.id(), error = %e, "failed to swap in confirmed record");
          Outcome::Pending
        }
      },
      Err(Error::RemoteUnavailable(reason)) => {
        debug!(collection = T::collection(), id = %record.id(), %reason, "still unreachable");
        Outcome::Pending
      }
      Err(e) => {
        warn!(collection = T::collection(), id = %record.id(), error = %e, "pending write rejected, dropping it");
        if let Err(e) = store.discard::<T>(record.id()) {
          warn!(collection = T::collection(), id = %record.id(), error = %e, "failed to drop rejected write");
        }
        Outcome::Rejected
      }
    };
    Some(outcome)
  }

  /// Probe, then replay. A probe that doesn't permit the method counts as unreachable.
  async fn attempt<T: PendingWrite>(&self, record: &T) -> Result<T> {
    let path = record.probe_path();
    let allowed = match self.gateway.probe(&path).await {
      Ok(allowed) => allowed,
      Err(Error::RemoteRejected { status, .. }) => {
        return Err(Error::RemoteUnavailable(format!(
          "probe of {} refused with status {}",
          path, status
        )))
      }
      Err(e) => return Err(e),
    };

    let method = T::write_method();
    if !allowed.permits(&method) {
      return Err(Error::RemoteUnavailable(format!(
        "{} not currently permitted on {}",
        method, path
      )));
    }

    let mut canonical = record.replay(&*self.gateway).await?;
    canonical.set_pending(false);
    Ok(canonical)
  }
}
