//! Remote side of the cache: the gateway trait and capability probe results.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;

use crate::error::Result;

/// Methods the remote currently permits on a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedMethods(HashSet<Method>);

impl AllowedMethods {
  /// Nothing permitted. Used when the probe itself is refused.
  pub fn none() -> Self {
    Self::default()
  }

  /// Parse a comma separated list such as an `Allow` header value.
  pub fn parse(list: &str) -> Self {
    Self(
      list
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
        .collect(),
    )
  }

  pub fn permits(&self, method: &Method) -> bool {
    self.0.contains(method)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromIterator<Method> for AllowedMethods {
  fn from_iter<I: IntoIterator<Item = Method>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

/// Request/response contract of the remote resource.
///
/// Paths are relative to the gateway's base URL. Network errors and timeouts
/// are reported as `Error::RemoteUnavailable`, failure statuses as
/// `Error::RemoteRejected` (`Error::NotFound` for 404 on `fetch_one`).
pub trait Gateway: Send + Sync + 'static {
  /// Ask which mutating methods the resource accepts right now.
  fn probe(&self, path: &str) -> impl Future<Output = Result<AllowedMethods>> + Send;

  fn fetch_collection<T>(&self, path: &str) -> impl Future<Output = Result<Vec<T>>> + Send
  where
    T: DeserializeOwned + Send;

  fn fetch_one<T>(&self, path: &str) -> impl Future<Output = Result<T>> + Send
  where
    T: DeserializeOwned + Send;

  /// `POST` a new record; the response carries the canonical copy.
  fn create<T>(&self, path: &str, payload: &Value) -> impl Future<Output = Result<T>> + Send
  where
    T: DeserializeOwned + Send;

  /// `PUT` to an existing record. A null payload sends no body.
  fn update<T>(&self, path: &str, payload: &Value) -> impl Future<Output = Result<T>> + Send
  where
    T: DeserializeOwned + Send;
}
