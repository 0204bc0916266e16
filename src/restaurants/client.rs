use reqwest::header::{ACCESS_CONTROL_ALLOW_METHODS, ALLOW};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::cache::{AllowedMethods, Gateway};
use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// HTTP client for the restaurant reviews server
#[derive(Clone)]
pub struct HttpGateway {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpGateway {
  pub fn new(config: &ServerConfig) -> Result<Self> {
    // Without the trailing slash `join` would replace the last path segment
    let base = if config.url.ends_with('/') {
      config.url.clone()
    } else {
      format!("{}/", config.url)
    };
    let base_url = Url::parse(&base)?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(Error::HttpClient)?;

    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn url(&self, path: &str) -> Result<Url> {
    Ok(self.base_url.join(path)?)
  }

  async fn send<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
  ) -> Result<T> {
    let url = self.url(path)?;
    debug!(%method, %url, "remote request");

    let mut request = self.client.request(method.clone(), url.clone());
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| Error::RemoteUnavailable(format!("{} {}: {}", method, url, e)))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND && method == Method::GET {
      return Err(Error::NotFound(path.trim_end_matches('/').to_string()));
    }
    if !status.is_success() {
      return Err(Error::RemoteRejected {
        method: method.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
      });
    }

    // A body cut off mid-transfer is a network failure, not bad data
    let bytes = response
      .bytes()
      .await
      .map_err(|e| Error::RemoteUnavailable(format!("{} {}: {}", method, url, e)))?;

    Ok(serde_json::from_slice(&bytes)?)
  }
}

impl Gateway for HttpGateway {
  async fn probe(&self, path: &str) -> Result<AllowedMethods> {
    let url = self.url(path)?;

    let response = self
      .client
      .request(Method::OPTIONS, url.clone())
      .send()
      .await
      .map_err(|e| Error::RemoteUnavailable(format!("OPTIONS {}: {}", url, e)))?;

    if !response.status().is_success() {
      debug!(%url, status = response.status().as_u16(), "probe refused");
      return Ok(AllowedMethods::none());
    }

    for header in [ALLOW, ACCESS_CONTROL_ALLOW_METHODS] {
      if let Some(value) = response.headers().get(&header) {
        if let Ok(list) = value.to_str() {
          return Ok(AllowedMethods::parse(list));
        }
      }
    }

    let body = response
      .text()
      .await
      .map_err(|e| Error::RemoteUnavailable(format!("OPTIONS {}: {}", url, e)))?;
    Ok(parse_probe_body(&body))
  }

  async fn fetch_collection<T>(&self, path: &str) -> Result<Vec<T>>
  where
    T: DeserializeOwned + Send,
  {
    self.send(Method::GET, path, None).await
  }

  async fn fetch_one<T>(&self, path: &str) -> Result<T>
  where
    T: DeserializeOwned + Send,
  {
    self.send(Method::GET, path, None).await
  }

  async fn create<T>(&self, path: &str, payload: &Value) -> Result<T>
  where
    T: DeserializeOwned + Send,
  {
    self.send(Method::POST, path, Some(payload)).await
  }

  async fn update<T>(&self, path: &str, payload: &Value) -> Result<T>
  where
    T: DeserializeOwned + Send,
  {
    let body = (!payload.is_null()).then_some(payload);
    self.send(Method::PUT, path, body).await
  }
}

/// Servers without an `Allow` header list the methods in the body, either as
/// a JSON array or as plain comma separated text.
fn parse_probe_body(body: &str) -> AllowedMethods {
  match serde_json::from_str::<Vec<String>>(body) {
    Ok(methods) => AllowedMethods::parse(&methods.join(",")),
    Err(_) => AllowedMethods::parse(body),
  }
}
