//! Wire-format helpers for the restaurant reviews server.
//!
//! The server is loose about types: favorites come back as `"true"`/`"false"`
//! strings, ids and ratings sometimes as numeric strings, timestamps as epoch
//! milliseconds. Everything is accepted on the way in and written back in one
//! canonical shape.

use serde::{Deserialize, Deserializer, Serialize};

use super::types::Review;

/// Body of `POST reviews/`. Never carries an id or the pending flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReview {
  #[serde(deserialize_with = "flexible_u64")]
  pub restaurant_id: u64,
  pub name: String,
  #[serde(deserialize_with = "flexible_rating")]
  pub rating: u8,
  pub comments: String,
}

impl From<&Review> for NewReview {
  fn from(review: &Review) -> Self {
    Self {
      restaurant_id: review.restaurant_id,
      name: review.author_name.clone(),
      rating: review.rating,
      comments: review.body.clone(),
    }
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
  Bool(bool),
  String(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
  Number(u64),
  String(String),
}

pub fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: Deserializer<'de>,
{
  match BoolOrString::deserialize(deserializer)? {
    BoolOrString::Bool(b) => Ok(b),
    BoolOrString::String(s) => match s.trim().to_ascii_lowercase().as_str() {
      "true" => Ok(true),
      "false" | "" => Ok(false),
      other => Err(serde::de::Error::custom(format!(
        "expected a boolean, got \"{}\"",
        other
      ))),
    },
  }
}

pub fn flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
  D: Deserializer<'de>,
{
  match NumberOrString::deserialize(deserializer)? {
    NumberOrString::Number(n) => Ok(n),
    NumberOrString::String(s) => s
      .trim()
      .parse()
      .map_err(|_| serde::de::Error::custom(format!("expected a number, got \"{}\"", s))),
  }
}

pub fn flexible_rating<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
  D: Deserializer<'de>,
{
  let n = flexible_u64(deserializer)?;
  u8::try_from(n).map_err(|_| serde::de::Error::custom(format!("rating {} out of range", n)))
}

/// `createdAt`: epoch milliseconds or RFC 3339 in, epoch milliseconds out.
pub mod timestamp {
  use chrono::{DateTime, Utc};
  use serde::{Deserialize, Deserializer, Serializer};

  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Millis(i64),
    Text(String),
  }

  pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    match value {
      Some(dt) => serializer.serialize_i64(dt.timestamp_millis()),
      None => serializer.serialize_none(),
    }
  }

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
  where
    D: Deserializer<'de>,
  {
    match Option::<Raw>::deserialize(deserializer)? {
      None => Ok(None),
      Some(Raw::Millis(ms)) => DateTime::from_timestamp_millis(ms)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("timestamp {} out of range", ms))),
      Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp \"{}\": {}", text, e))),
    }
  }
}
