use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::StoreLocation;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the reviews server
  #[serde(default = "default_server_url")]
  pub url: String,
  /// Per-request timeout; a timed out request counts as offline
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      url: default_server_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_server_url() -> String {
  "http://localhost:1337/".to_string()
}

fn default_timeout_secs() -> u64 {
  10
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Set to false to run without a local store
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Database file (defaults to $XDG_DATA_HOME/rrc/cache.db)
  pub path: Option<PathBuf>,
  /// Refresh loaded lists older than this from the server
  pub stale_after_secs: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      stale_after_secs: None,
    }
  }
}

fn default_true() -> bool {
  true
}

impl CacheConfig {
  pub fn store_location(&self) -> StoreLocation {
    match (&self.path, self.enabled) {
      (_, false) => StoreLocation::Disabled,
      (Some(path), true) => StoreLocation::Path(path.clone()),
      (None, true) => StoreLocation::Default,
    }
  }

  pub fn stale_after(&self) -> Option<chrono::Duration> {
    self
      .stale_after_secs
      .and_then(|secs| i64::try_from(secs).ok())
      .and_then(chrono::Duration::try_seconds)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./rrc.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/rrc/config.yaml
  ///
  /// Without a file the defaults are used. `RRC_SERVER_URL` overrides the
  /// server URL either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("RRC_SERVER_URL") {
      config.server.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("rrc.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("rrc").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file means all defaults
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents)
  }
}
