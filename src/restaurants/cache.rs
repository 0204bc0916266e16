//! Store bindings and replay rules for restaurant types.

use reqwest::Method;
use serde_json::Value;

use crate::cache::{CollectionSchema, Gateway, PendingWrite, Record, RecordId};
use crate::error::Result;

use super::api_types::NewReview;
use super::types::{Restaurant, Review};

pub const CUISINE_INDEX: &str = "cuisine_type";
pub const NEIGHBORHOOD_INDEX: &str = "neighborhood";
pub const RESTAURANT_INDEX: &str = "restaurant_id";

/// Collections and their secondary indexes, fixed for the store's lifetime.
pub const SCHEMA: &[CollectionSchema] = &[
  CollectionSchema {
    name: "restaurants",
    indexes: &[CUISINE_INDEX, NEIGHBORHOOD_INDEX],
  },
  CollectionSchema {
    name: "reviews",
    indexes: &[RESTAURANT_INDEX],
  },
];

// ============================================================================
// Record implementations
// ============================================================================

impl Record for Restaurant {
  fn collection() -> &'static str {
    "restaurants"
  }

  fn id(&self) -> &RecordId {
    &self.id
  }

  fn index_values(&self) -> Vec<(&'static str, String)> {
    vec![
      (CUISINE_INDEX, self.cuisine_type.clone()),
      (NEIGHBORHOOD_INDEX, self.neighborhood.clone()),
    ]
  }

  fn is_pending(&self) -> bool {
    self.pending
  }

  fn set_pending(&mut self, pending: bool) {
    self.pending = pending;
  }
}

impl Record for Review {
  fn collection() -> &'static str {
    "reviews"
  }

  fn id(&self) -> &RecordId {
    &self.id
  }

  fn index_values(&self) -> Vec<(&'static str, String)> {
    vec![(RESTAURANT_INDEX, self.restaurant_id.to_string())]
  }

  fn is_pending(&self) -> bool {
    self.pending
  }

  fn set_pending(&mut self, pending: bool) {
    self.pending = pending;
  }
}

// ============================================================================
// Replay rules
// ============================================================================

/// A pending restaurant carries a favorite flag the server hasn't seen.
/// The id is already canonical, so the record is updated in place.
impl PendingWrite for Restaurant {
  fn write_method() -> Method {
    Method::PUT
  }

  fn probe_path(&self) -> String {
    format!("restaurants/{}", self.id)
  }

  async fn replay<G: Gateway>(&self, gateway: &G) -> Result<Self> {
    let path = format!("restaurants/{}/?is_favorite={}", self.id, self.is_favorite);
    gateway.update(&path, &Value::Null).await
  }
}

/// A pending review has never reached the server and gets its id on replay.
impl PendingWrite for Review {
  fn write_method() -> Method {
    Method::POST
  }

  fn probe_path(&self) -> String {
    "reviews/".to_string()
  }

  async fn replay<G: Gateway>(&self, gateway: &G) -> Result<Self> {
    let payload = serde_json::to_value(NewReview::from(self))?;
    gateway.create("reviews/", &payload).await
  }
}
