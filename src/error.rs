//! Error type shared by the store, gateway, reconciler and facade.

/// Errors produced by the caching and synchronization layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Durable storage could not be opened or is no longer usable.
  #[error("local storage unavailable: {0}")]
  StorageUnavailable(String),

  #[error("local storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("failed to encode or decode record: {0}")]
  Serialization(#[from] serde_json::Error),

  /// Network error or timeout. Expected while offline.
  #[error("remote unavailable: {0}")]
  RemoteUnavailable(String),

  /// The server answered a well-formed request with a failure status.
  #[error("remote rejected {method} {url} with status {status}")]
  RemoteRejected {
    method: String,
    url: String,
    status: u16,
  },

  #[error("{0} not found")]
  NotFound(String),

  #[error("invalid review: {0}")]
  InvalidReview(String),

  #[error("unknown collection `{0}`")]
  UnknownCollection(String),

  #[error("unknown index `{index}` on collection `{collection}`")]
  UnknownIndex { collection: String, index: String },

  #[error("invalid remote url: {0}")]
  InvalidUrl(#[from] url::ParseError),

  #[error("failed to build http client: {0}")]
  HttpClient(reqwest::Error),
}

impl Error {
  /// Whether the failed operation may succeed later without any change.
  pub fn is_recoverable(&self) -> bool {
    matches!(self, Error::RemoteUnavailable(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
