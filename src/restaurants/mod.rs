//! Restaurants and their reviews on top of the generic cache.

mod api_types;
mod cache;
mod cached_client;
mod client;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use api_types::NewReview;
pub use cache::{CUISINE_INDEX, NEIGHBORHOOD_INDEX, RESTAURANT_INDEX, SCHEMA};
pub use cached_client::{ReviewsClient, ALL};
pub use client::HttpGateway;
pub use types::{LatLng, Restaurant, Review};
