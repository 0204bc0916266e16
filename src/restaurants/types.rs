use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::api_types::{flexible_bool, flexible_rating, flexible_u64, timestamp};
use crate::cache::RecordId;

fn is_false(b: &bool) -> bool {
  !*b
}

/// Geographic position of a restaurant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
  pub lat: f64,
  pub lng: f64,
}

/// A restaurant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
  pub id: RecordId,
  pub name: String,
  pub neighborhood: String,
  #[serde(default)]
  pub photograph: Option<String>,
  pub address: String,
  pub latlng: LatLng,
  pub cuisine_type: String,
  /// Day name to opening hours text
  #[serde(default)]
  pub operating_hours: BTreeMap<String, String>,
  #[serde(default, deserialize_with = "flexible_bool")]
  pub is_favorite: bool,
  /// Changed locally, not yet confirmed by the server
  #[serde(default, skip_serializing_if = "is_false")]
  pub pending: bool,
}

/// A review of a restaurant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
  pub id: RecordId,
  #[serde(deserialize_with = "flexible_u64")]
  pub restaurant_id: u64,
  #[serde(rename = "name")]
  pub author_name: String,
  /// 1 to 5
  #[serde(deserialize_with = "flexible_rating")]
  pub rating: u8,
  #[serde(rename = "comments")]
  pub body: String,
  #[serde(rename = "createdAt", default, with = "timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  /// Written locally, not yet confirmed by the server
  #[serde(default, skip_serializing_if = "is_false")]
  pub pending: bool,
}
