//! In-process stand-in for the reviews server, and record fixtures.

use chrono::Utc;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::api_types::NewReview;
use super::types::{LatLng, Restaurant, Review};
use crate::cache::{AllowedMethods, Gateway, RecordId};
use crate::error::{Error, Result};

pub fn restaurant(id: u64, cuisine: &str, neighborhood: &str) -> Restaurant {
  Restaurant {
    id: RecordId::Canonical(id),
    name: format!("Restaurant {}", id),
    neighborhood: neighborhood.to_string(),
    photograph: Some(format!("{}.jpg", id)),
    address: format!("{} Main St", id),
    latlng: LatLng {
      lat: 40.7,
      lng: -73.9,
    },
    cuisine_type: cuisine.to_string(),
    operating_hours: BTreeMap::from([("Monday".to_string(), "5:30 pm - 11:00 pm".to_string())]),
    is_favorite: false,
    pending: false,
  }
}

pub fn review(id: RecordId, restaurant_id: u64) -> Review {
  Review {
    id,
    restaurant_id,
    author_name: "Ana".to_string(),
    rating: 4,
    body: "Good food.".to_string(),
    created_at: None,
    pending: false,
  }
}

pub fn five_restaurants() -> Vec<Restaurant> {
  vec![
    restaurant(1, "italian", "Manhattan"),
    restaurant(2, "asian", "Brooklyn"),
    restaurant(3, "italian", "Queens"),
    restaurant(4, "american", "Manhattan"),
    restaurant(5, "mexican", "Brooklyn"),
  ]
}

#[derive(Default)]
struct RemoteState {
  restaurants: Vec<Restaurant>,
  reviews: Vec<Review>,
  next_review_id: u64,
}

/// Gateway backed by in-memory state, with switches for going offline,
/// refusing writes at the probe, and rejecting writes outright.
pub struct FakeGateway {
  state: Mutex<RemoteState>,
  online: AtomicBool,
  writes_permitted: AtomicBool,
  rejecting: AtomicBool,
  yielding: AtomicBool,
  log: Mutex<Vec<String>>,
}

impl FakeGateway {
  pub fn with_restaurants(restaurants: Vec<Restaurant>) -> Self {
    Self {
      state: Mutex::new(RemoteState {
        restaurants,
        reviews: Vec::new(),
        next_review_id: 100,
      }),
      online: AtomicBool::new(true),
      writes_permitted: AtomicBool::new(true),
      rejecting: AtomicBool::new(false),
      yielding: AtomicBool::new(false),
      log: Mutex::new(Vec::new()),
    }
  }

  pub fn with_reviews(self, reviews: Vec<Review>) -> Self {
    self.state.lock().unwrap().reviews = reviews;
    self
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn set_writes_permitted(&self, permitted: bool) {
    self.writes_permitted.store(permitted, Ordering::SeqCst);
  }

  pub fn set_rejecting(&self, rejecting: bool) {
    self.rejecting.store(rejecting, Ordering::SeqCst);
  }

  /// Make every call suspend once before it is handled, so concurrent
  /// callers interleave the way they would against a real server.
  pub fn set_yielding(&self, yielding: bool) {
    self.yielding.store(yielding, Ordering::SeqCst);
  }

  /// Number of requests received, including ones made while offline.
  pub fn calls(&self) -> usize {
    self.log.lock().unwrap().len()
  }

  pub fn calls_to(&self, method: &str) -> usize {
    let prefix = format!("{} ", method);
    self
      .log
      .lock()
      .unwrap()
      .iter()
      .filter(|call| call.starts_with(&prefix))
      .count()
  }

  pub fn remote_reviews(&self) -> Vec<Review> {
    self.state.lock().unwrap().reviews.clone()
  }

  pub fn remote_restaurant(&self, id: u64) -> Option<Restaurant> {
    self
      .state
      .lock()
      .unwrap()
      .restaurants
      .iter()
      .find(|r| r.id == RecordId::Canonical(id))
      .cloned()
  }

  async fn request(&self, method: &Method, path: &str) -> Result<()> {
    if self.yielding.load(Ordering::SeqCst) {
      tokio::task::yield_now().await;
    }
    self.log.lock().unwrap().push(format!("{} {}", method, path));
    if self.online.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(Error::RemoteUnavailable("connection refused".into()))
    }
  }

  fn check_write(&self, method: &Method, path: &str) -> Result<()> {
    if self.rejecting.load(Ordering::SeqCst) {
      return Err(Error::RemoteRejected {
        method: method.to_string(),
        url: path.to_string(),
        status: 400,
      });
    }
    Ok(())
  }
}

/// Restaurants go out the way the server sends them, favorite as a string.
fn restaurant_on_wire(restaurant: &Restaurant) -> Result<Value> {
  let mut value = serde_json::to_value(restaurant)?;
  value["is_favorite"] = Value::String(restaurant.is_favorite.to_string());
  Ok(value)
}

fn reshape<T: DeserializeOwned>(value: impl Serialize) -> Result<T> {
  Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}

fn split_path(path: &str) -> (&str, Option<&str>) {
  match path.split_once('?') {
    Some((route, query)) => (route.trim_end_matches('/'), Some(query)),
    None => (path.trim_end_matches('/'), None),
  }
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
  query?
    .split('&')
    .filter_map(|pair| pair.split_once('='))
    .find(|(key, _)| *key == name)
    .map(|(_, value)| value)
}

fn restaurant_id(route: &str) -> Option<u64> {
  route.strip_prefix("restaurants/")?.parse().ok()
}

impl Gateway for FakeGateway {
  async fn probe(&self, path: &str) -> Result<AllowedMethods> {
    self.request(&Method::OPTIONS, path).await?;
    let allowed = if self.writes_permitted.load(Ordering::SeqCst) {
      vec![Method::GET, Method::POST, Method::PUT, Method::OPTIONS]
    } else {
      vec![Method::GET, Method::OPTIONS]
    };
    Ok(allowed.into_iter().collect())
  }

  async fn fetch_collection<T>(&self, path: &str) -> Result<Vec<T>>
  where
    T: DeserializeOwned + Send,
  {
    self.request(&Method::GET, path).await?;
    let state = self.state.lock().unwrap();

    match split_path(path) {
      ("restaurants", _) => state
        .restaurants
        .iter()
        .map(|r| restaurant_on_wire(r).and_then(reshape))
        .collect(),
      ("reviews", query) => {
        let wanted = query_param(query, "restaurant_id").and_then(|id| id.parse::<u64>().ok());
        let matching: Vec<&Review> = state
          .reviews
          .iter()
          .filter(|r| wanted.map_or(true, |id| r.restaurant_id == id))
          .collect();
        reshape(matching)
      }
      (route, _) => Err(Error::NotFound(route.to_string())),
    }
  }

  async fn fetch_one<T>(&self, path: &str) -> Result<T>
  where
    T: DeserializeOwned + Send,
  {
    self.request(&Method::GET, path).await?;
    let (route, _) = split_path(path);
    let id = restaurant_id(route).ok_or_else(|| Error::NotFound(route.to_string()))?;

    let state = self.state.lock().unwrap();
    let found = state
      .restaurants
      .iter()
      .find(|r| r.id == RecordId::Canonical(id))
      .ok_or_else(|| Error::NotFound(route.to_string()))?;
    reshape(restaurant_on_wire(found)?)
  }

  async fn create<T>(&self, path: &str, payload: &Value) -> Result<T>
  where
    T: DeserializeOwned + Send,
  {
    self.request(&Method::POST, path).await?;
    self.check_write(&Method::POST, path)?;

    let new: NewReview = serde_json::from_value(payload.clone())?;
    let mut state = self.state.lock().unwrap();
    state.next_review_id += 1;
    let created = Review {
      id: RecordId::Canonical(state.next_review_id),
      restaurant_id: new.restaurant_id,
      author_name: new.name,
      rating: new.rating,
      body: new.comments,
      created_at: Some(Utc::now()),
      pending: false,
    };
    state.reviews.push(created.clone());
    reshape(created)
  }

  async fn update<T>(&self, path: &str, _payload: &Value) -> Result<T>
  where
    T: DeserializeOwned + Send,
  {
    self.request(&Method::PUT, path).await?;
    self.check_write(&Method::PUT, path)?;

    let (route, query) = split_path(path);
    let id = restaurant_id(route).ok_or_else(|| Error::NotFound(route.to_string()))?;
    let favorite = query_param(query, "is_favorite") == Some("true");

    let mut state = self.state.lock().unwrap();
    let found = state
      .restaurants
      .iter_mut()
      .find(|r| r.id == RecordId::Canonical(id))
      .ok_or_else(|| Error::NotFound(route.to_string()))?;
    found.is_favorite = favorite;
    reshape(restaurant_on_wire(found)?)
  }
}
