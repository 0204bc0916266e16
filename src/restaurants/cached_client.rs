//! Restaurant reviews client with transparent offline caching.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;

use crate::cache::{
  CacheLayer, Gateway, ListQuery, LocalStore, ReconcileReport, Reconciler, RecordId,
  SyntheticIdGenerator,
};
use crate::config::Config;
use crate::error::{Error, Result};

use super::cache::{CUISINE_INDEX, NEIGHBORHOOD_INDEX, RESTAURANT_INDEX, SCHEMA};
use super::client::HttpGateway;
use super::types::{Restaurant, Review};

/// Filter value matching every cuisine or neighborhood.
pub const ALL: &str = "all";

/// Restaurant reviews client with transparent caching support.
///
/// Reads are served from the local store once loaded and fall back to it
/// when the server is unreachable. Writes made while offline are kept as
/// pending and replayed on the next read of the same collection, or on
/// `sync`.
pub struct ReviewsClient<G: Gateway = HttpGateway> {
  store: Arc<LocalStore>,
  gateway: Arc<G>,
  cache: CacheLayer,
  reconciler: Reconciler<G>,
  ids: SyntheticIdGenerator,
}

impl ReviewsClient<HttpGateway> {
  /// Create a client for the configured server and local store.
  pub fn new(config: &Config) -> Result<Self> {
    let gateway = HttpGateway::new(&config.server)?;
    let store = LocalStore::new(config.cache.store_location(), SCHEMA);

    let client = Self::with_gateway(gateway, store);
    Ok(match config.cache.stale_after() {
      Some(stale_after) => client.with_stale_time(stale_after),
      None => client,
    })
  }
}

impl<G: Gateway> ReviewsClient<G> {
  pub fn with_gateway(gateway: G, store: LocalStore) -> Self {
    let store = Arc::new(store);
    let gateway = Arc::new(gateway);

    Self {
      cache: CacheLayer::new(store.clone()),
      reconciler: Reconciler::new(store.clone(), gateway.clone()),
      store,
      gateway,
      ids: SyntheticIdGenerator::new(),
    }
  }

  /// Reload loaded lists from the server once they are older than `stale_after`.
  pub fn with_stale_time(mut self, stale_after: Duration) -> Self {
    self.cache = self.cache.with_stale_time(stale_after);
    self
  }

  pub fn gateway(&self) -> &G {
    &self.gateway
  }

  /// All restaurants.
  pub async fn list_restaurants(&self) -> Result<Vec<Restaurant>> {
    self.reconciler.reconcile::<Restaurant>().await;

    let result = self
      .cache
      .fetch_list(&ListQuery::all::<Restaurant>(), || {
        self.gateway.fetch_collection("restaurants")
      })
      .await?;

    Ok(result.data)
  }

  /// A single restaurant by id.
  pub async fn get_restaurant(&self, id: u64) -> Result<Restaurant> {
    self.reconciler.reconcile::<Restaurant>().await;

    let path = format!("restaurants/{}", id);
    let result = self
      .cache
      .fetch_one(&RecordId::Canonical(id), || self.gateway.fetch_one(&path))
      .await?;

    Ok(result.data)
  }

  /// Restaurants matching a cuisine and a neighborhood. `"all"` matches anything.
  ///
  /// The full list is loaded first, then the narrower index is read locally.
  /// Without a persistent store the loaded list is filtered in memory.
  pub async fn list_restaurants_filtered(
    &self,
    cuisine: &str,
    neighborhood: &str,
  ) -> Result<Vec<Restaurant>> {
    let cuisine = filter_value(cuisine);
    let neighborhood = filter_value(neighborhood);

    let all = self.list_restaurants().await?;

    let lookup = match (cuisine, neighborhood) {
      (Some(cuisine), _) => Some((CUISINE_INDEX, cuisine)),
      (None, Some(neighborhood)) => Some((NEIGHBORHOOD_INDEX, neighborhood)),
      (None, None) => None,
    };
    let indexed = self.cache.is_persistent().await;
    let candidates = match lookup {
      Some((index, value)) if indexed => {
        self.cache.fetch_by_index(index, value).await?
      }
      _ => all,
    };

    Ok(
      candidates
        .into_iter()
        .filter(|r| cuisine.map_or(true, |c| r.cuisine_type == c))
        .filter(|r| neighborhood.map_or(true, |n| r.neighborhood == n))
        .collect(),
    )
  }

  /// Reviews of one restaurant, oldest first.
  pub async fn list_reviews_for(&self, restaurant_id: u64) -> Result<Vec<Review>> {
    self.reconciler.reconcile::<Review>().await;

    let query = ListQuery::by_index::<Review>(RESTAURANT_INDEX, restaurant_id.to_string());
    let path = format!("reviews/?restaurant_id={}", restaurant_id);
    let mut reviews: Vec<Review> = self
      .cache
      .fetch_list(&query, || self.gateway.fetch_collection(&path))
      .await?
      .data;

    reviews.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(reviews)
  }

  /// Post a review, or keep it as pending if the server can't take it now.
  ///
  /// The returned review carries a synthetic id and `pending = true` when it
  /// was queued. A review the server rejects is returned as an error and not
  /// kept.
  pub async fn add_review(
    &self,
    restaurant_id: u64,
    author: &str,
    rating: u8,
    body: &str,
  ) -> Result<Review> {
    let author = author.trim();
    let body = body.trim();
    if !(1..=5).contains(&rating) {
      return Err(Error::InvalidReview(format!(
        "rating must be between 1 and 5, got {}",
        rating
      )));
    }
    if author.is_empty() {
      return Err(Error::InvalidReview("author name is empty".into()));
    }
    if body.is_empty() {
      return Err(Error::InvalidReview("review text is empty".into()));
    }

    // Reviews only ever point at restaurants that exist
    self.get_restaurant(restaurant_id).await?;

    let draft = Review {
      id: self.ids.next_id(),
      restaurant_id,
      author_name: author.to_string(),
      rating,
      body: body.to_string(),
      created_at: Some(Utc::now()),
      pending: false,
    };

    self.reconciler.write(draft).await
  }

  /// Flip the favorite flag of a restaurant.
  ///
  /// Toggling the same restaurant again while offline overwrites the pending
  /// change instead of queueing a second one.
  pub async fn toggle_favorite(&self, restaurant: &Restaurant) -> Result<Restaurant> {
    let mut draft = restaurant.clone();
    draft.is_favorite = !draft.is_favorite;

    self.reconciler.write(draft).await
  }

  /// Neighborhood names in first-seen order.
  pub async fn list_neighborhoods(&self) -> Result<Vec<String>> {
    let restaurants = self.list_restaurants().await?;
    Ok(unique(restaurants.into_iter().map(|r| r.neighborhood)))
  }

  /// Cuisine names in first-seen order.
  pub async fn list_cuisines(&self) -> Result<Vec<String>> {
    let restaurants = self.list_restaurants().await?;
    Ok(unique(restaurants.into_iter().map(|r| r.cuisine_type)))
  }

  /// Replay every pending write now.
  pub async fn sync(&self) -> ReconcileReport {
    let (restaurants, reviews) = tokio::join!(
      self.reconciler.reconcile::<Restaurant>(),
      self.reconciler.reconcile::<Review>()
    );
    let report = restaurants + reviews;

    if !report.is_empty() {
      info!(
        confirmed = report.confirmed,
        pending = report.pending,
        rejected = report.rejected,
        "sync finished"
      );
    }
    report
  }

  /// Release the local store.
  pub fn close(self) {
    let Self {
      store,
      cache,
      reconciler,
      ..
    } = self;
    // The layer and reconciler hold the other references
    drop(cache);
    drop(reconciler);

    match Arc::try_unwrap(store) {
      Ok(mut store) => store.close(),
      Err(_) => info!("local store still shared, leaving it open"),
    }
  }
}

fn filter_value(value: &str) -> Option<&str> {
  let value = value.trim();
  (!value.is_empty() && !value.eq_ignore_ascii_case(ALL)).then_some(value)
}

fn unique(values: impl Iterator<Item = String>) -> Vec<String> {
  let mut seen = Vec::new();
  for value in values {
    if !seen.contains(&value) {
      seen.push(value);
    }
  }
  seen
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, StoreLocation};
  use crate::restaurants::testing::{five_restaurants, restaurant, review, FakeGateway};

  fn client_with(gateway: FakeGateway) -> ReviewsClient<FakeGateway> {
    ReviewsClient::with_gateway(gateway, LocalStore::new(StoreLocation::InMemory, SCHEMA))
  }

  fn client() -> ReviewsClient<FakeGateway> {
    client_with(FakeGateway::with_restaurants(five_restaurants()))
  }

  #[tokio::test]
  async fn test_second_list_is_served_locally() {
    let client = client();

    let first = client.list_restaurants().await.unwrap();
    let second = client.list_restaurants().await.unwrap();

    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
    assert_eq!(client.gateway().calls_to("GET"), 1);
  }

  #[tokio::test]
  async fn test_list_survives_going_offline() {
    let client = client();
    client.list_restaurants().await.unwrap();

    client.gateway().set_online(false);
    assert_eq!(client.list_restaurants().await.unwrap().len(), 5);
  }

  #[tokio::test]
  async fn test_first_list_offline_fails() {
    let client = client();
    client.gateway().set_online(false);

    assert!(matches!(
      client.list_restaurants().await,
      Err(Error::RemoteUnavailable(_))
    ));
  }

  #[tokio::test]
  async fn test_filter_by_cuisine() {
    let client = client();

    let italian = client
      .list_restaurants_filtered("italian", ALL)
      .await
      .unwrap();

    assert_eq!(italian.len(), 2);
    assert!(italian.iter().all(|r| r.cuisine_type == "italian"));
  }

  #[tokio::test]
  async fn test_filter_by_both() {
    let client = client();

    let found = client
      .list_restaurants_filtered("italian", "Queens")
      .await
      .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, RecordId::Canonical(3));

    let brooklyn = client.list_restaurants_filtered(ALL, "Brooklyn").await.unwrap();
    assert_eq!(brooklyn.len(), 2);

    assert_eq!(client.list_restaurants_filtered("all", "all").await.unwrap().len(), 5);
  }

  #[tokio::test]
  async fn test_filter_without_store_filters_in_memory() {
    let client = ReviewsClient::with_gateway(
      FakeGateway::with_restaurants(five_restaurants()),
      LocalStore::new(StoreLocation::Disabled, SCHEMA),
    );

    let italian = client
      .list_restaurants_filtered("italian", ALL)
      .await
      .unwrap();
    assert_eq!(italian.len(), 2);
  }

  #[tokio::test]
  async fn test_get_restaurant_caches_record() {
    let client = client();

    let first = client.get_restaurant(4).await.unwrap();
    client.gateway().set_online(false);
    let second = client.get_restaurant(4).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(client.gateway().calls_to("GET"), 1);
  }

  #[tokio::test]
  async fn test_missing_restaurant_is_not_found_and_not_stored() {
    let client = client();

    assert!(matches!(
      client.get_restaurant(42).await,
      Err(Error::NotFound(_))
    ));
    assert!(client
      .store
      .open()
      .await
      .get::<Restaurant>(&RecordId::Canonical(42))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_add_review_online() {
    let client = client();

    let saved = client
      .add_review(2, "  Ana ", 5, "Great dumplings.")
      .await
      .unwrap();

    assert!(!saved.pending);
    assert_eq!(saved.author_name, "Ana");
    assert_eq!(client.gateway().remote_reviews().len(), 1);

    let reviews = client.list_reviews_for(2).await.unwrap();
    assert_eq!(reviews, vec![saved]);
  }

  #[tokio::test]
  async fn test_offline_review_round_trip() {
    let client = client();
    client.get_restaurant(1).await.unwrap();
    client.gateway().set_online(false);

    let placeholder = client.add_review(1, "Ana", 4, "Lovely.").await.unwrap();
    assert!(placeholder.pending);
    assert!(placeholder.id.is_synthetic());

    // Visible locally while still offline
    let offline = client.list_reviews_for(1).await.unwrap();
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0].id, placeholder.id);

    client.gateway().set_online(true);
    let report = client.sync().await;
    assert_eq!(report.confirmed, 1);

    let reviews = client.list_reviews_for(1).await.unwrap();
    assert_eq!(reviews.len(), 1);
    assert!(!reviews[0].pending);
    assert!(!reviews[0].id.is_synthetic());
    assert_eq!(reviews[0].body, "Lovely.");
    assert_eq!(client.gateway().remote_reviews().len(), 1);
  }

  #[tokio::test]
  async fn test_sync_is_idempotent() {
    let client = client();
    client.get_restaurant(1).await.unwrap();
    client.gateway().set_online(false);
    client.add_review(1, "Ana", 4, "Lovely.").await.unwrap();
    client.gateway().set_online(true);

    assert_eq!(client.sync().await.confirmed, 1);
    let calls = client.gateway().calls();
    assert!(client.sync().await.is_empty());

    assert_eq!(client.gateway().calls(), calls);
    assert_eq!(client.gateway().remote_reviews().len(), 1);
  }

  #[tokio::test]
  async fn test_overlapping_reads_post_queued_review_once() {
    let client = client();
    client.get_restaurant(1).await.unwrap();
    client.gateway().set_online(false);
    client.add_review(1, "Ana", 4, "Lovely.").await.unwrap();

    client.gateway().set_online(true);
    client.gateway().set_yielding(true);
    let (a, b) = tokio::join!(client.list_reviews_for(1), client.list_reviews_for(1));

    assert_eq!(a.unwrap().len(), 1);
    assert_eq!(b.unwrap().len(), 1);
    assert_eq!(client.gateway().calls_to("POST"), 1);
    assert_eq!(client.gateway().remote_reviews().len(), 1);
    assert_eq!(client.store.open().await.get_all::<Review>().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_rejected_queued_review_is_not_resent() {
    let client = client();
    client.get_restaurant(1).await.unwrap();
    client.gateway().set_online(false);
    client.add_review(1, "Ana", 4, "Lovely.").await.unwrap();

    client.gateway().set_online(true);
    client.gateway().set_rejecting(true);
    for _ in 0..3 {
      assert!(client.list_reviews_for(1).await.unwrap().is_empty());
    }

    assert_eq!(client.gateway().calls_to("POST"), 1);
    assert!(client.gateway().remote_reviews().is_empty());
  }

  #[tokio::test]
  async fn test_rejected_queued_favorite_falls_back_to_remote_copy() {
    let client = client();
    client.list_restaurants().await.unwrap();
    let restaurant = client.get_restaurant(3).await.unwrap();
    client.gateway().set_online(false);
    client.toggle_favorite(&restaurant).await.unwrap();

    client.gateway().set_online(true);
    client.gateway().set_rejecting(true);
    let listed = client.list_restaurants().await.unwrap();

    assert_eq!(listed.len(), 5);
    let reloaded = listed.iter().find(|r| r.id == restaurant.id).unwrap();
    assert!(!reloaded.is_favorite);
    assert!(!reloaded.pending);
    assert_eq!(client.gateway().calls_to("PUT"), 1);
  }

  #[tokio::test]
  async fn test_reviews_sorted_oldest_first() {
    let mut older = review(RecordId::Canonical(1), 3);
    older.created_at = chrono::DateTime::from_timestamp_millis(1_000);
    let mut newer = review(RecordId::Canonical(2), 3);
    newer.created_at = chrono::DateTime::from_timestamp_millis(2_000);

    let client = client_with(
      FakeGateway::with_restaurants(five_restaurants()).with_reviews(vec![newer.clone(), older.clone()]),
    );

    let reviews = client.list_reviews_for(3).await.unwrap();
    assert_eq!(reviews, vec![older, newer]);
  }

  #[tokio::test]
  async fn test_invalid_review_makes_no_calls() {
    let client = client();

    for (rating, author, body) in [(0, "Ana", "Ok."), (6, "Ana", "Ok."), (3, "  ", "Ok."), (3, "Ana", "")] {
      assert!(matches!(
        client.add_review(1, author, rating, body).await,
        Err(Error::InvalidReview(_))
      ));
    }
    assert_eq!(client.gateway().calls(), 0);
  }

  #[tokio::test]
  async fn test_review_for_unknown_restaurant() {
    let client = client();

    assert!(matches!(
      client.add_review(99, "Ana", 3, "Where am I?").await,
      Err(Error::NotFound(_))
    ));
    assert_eq!(client.gateway().calls_to("POST"), 0);
  }

  #[tokio::test]
  async fn test_toggle_favorite_online() {
    let client = client();
    let restaurant = client.get_restaurant(2).await.unwrap();

    let toggled = client.toggle_favorite(&restaurant).await.unwrap();

    assert!(toggled.is_favorite);
    assert!(!toggled.pending);
    assert!(client.gateway().remote_restaurant(2).unwrap().is_favorite);
    assert!(client.get_restaurant(2).await.unwrap().is_favorite);
  }

  #[tokio::test]
  async fn test_double_offline_toggle_leaves_one_pending_record() {
    let client = client();
    let original = client.get_restaurant(2).await.unwrap();
    client.gateway().set_online(false);

    let once = client.toggle_favorite(&original).await.unwrap();
    let twice = client.toggle_favorite(&once).await.unwrap();

    assert_eq!(twice.is_favorite, original.is_favorite);
    let pending = client
      .store
      .open()
      .await
      .get_pending::<Restaurant>()
      .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, original.id);
    assert_eq!(pending[0].is_favorite, original.is_favorite);
  }

  #[tokio::test]
  async fn test_pending_favorite_survives_list_refresh() {
    let client = client();
    let restaurant = client.get_restaurant(5).await.unwrap();
    client.gateway().set_writes_permitted(false);

    let toggled = client.toggle_favorite(&restaurant).await.unwrap();
    assert!(toggled.pending);

    // Reads still work, writes are refused at the probe
    let listed = client.list_restaurants().await.unwrap();
    let local = listed.iter().find(|r| r.id == restaurant.id).unwrap();
    assert!(local.is_favorite);
    assert!(local.pending);

    client.gateway().set_writes_permitted(true);
    client.sync().await;
    assert!(client.gateway().remote_restaurant(5).unwrap().is_favorite);
  }

  #[tokio::test]
  async fn test_rejected_favorite_is_surfaced() {
    let client = client();
    let restaurant = client.get_restaurant(1).await.unwrap();
    client.gateway().set_rejecting(true);

    assert!(matches!(
      client.toggle_favorite(&restaurant).await,
      Err(Error::RemoteRejected { status: 400, .. })
    ));
    assert!(!client.get_restaurant(1).await.unwrap().is_favorite);
  }

  #[tokio::test]
  async fn test_disabled_store_passes_through() {
    let client = ReviewsClient::with_gateway(
      FakeGateway::with_restaurants(five_restaurants()),
      LocalStore::new(StoreLocation::Disabled, SCHEMA),
    );

    client.list_restaurants().await.unwrap();
    client.list_restaurants().await.unwrap();
    assert_eq!(client.gateway().calls_to("GET"), 2);

    let saved = client.add_review(1, "Ana", 4, "Fine.").await.unwrap();
    assert!(!saved.pending);
  }

  #[tokio::test]
  async fn test_unique_neighborhoods_and_cuisines() {
    let client = client();

    assert_eq!(
      client.list_neighborhoods().await.unwrap(),
      vec!["Manhattan", "Brooklyn", "Queens"]
    );
    assert_eq!(
      client.list_cuisines().await.unwrap(),
      vec!["italian", "asian", "american", "mexican"]
    );
  }

  #[tokio::test]
  async fn test_cached_list_reports_cache_source() {
    let client = client_with(FakeGateway::with_restaurants(vec![restaurant(
      7, "thai", "Queens",
    )]));
    let query = ListQuery::all::<Restaurant>();

    client.list_restaurants().await.unwrap();
    let result = client
      .cache
      .fetch_list::<Restaurant, _, _>(&query, || async { Ok(Vec::new()) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.len(), 1);
  }

  #[tokio::test]
  async fn test_close_releases_store() {
    let client = client();
    client.list_restaurants().await.unwrap();
    client.close();
  }
}
