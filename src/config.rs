use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::reconcile::RollbackPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub appwrite: AppwriteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub reconcile: ReconcileConfig,
  #[serde(default)]
  pub feed: FeedConfig,
}

/// Where the platform lives and which collections hold what
#[derive(Debug, Clone, Deserialize)]
pub struct AppwriteConfig {
  /// API root, e.g. "https://cloud.appwrite.io/v1"
  pub endpoint: String,
  pub project_id: String,
  pub database_id: String,
  pub user_collection_id: String,
  pub post_collection_id: String,
  pub saves_collection_id: String,
  /// Bucket for post images and avatars
  pub storage_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Disable to send every read to the platform
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Seconds before a cached read is refetched
  #[serde(default = "default_stale_time")]
  pub stale_time_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      stale_time_secs: default_stale_time(),
    }
  }
}

impl CacheConfig {
  /// Stale time as a duration; fails when it does not fit one.
  pub fn stale_time(&self) -> Result<chrono::Duration> {
    i64::try_from(self.stale_time_secs)
      .ok()
      .and_then(chrono::Duration::try_seconds)
      .ok_or_else(|| eyre!("cache.stale_time_secs is too large: {}", self.stale_time_secs))
  }
}

fn default_true() -> bool {
  true
}

fn default_stale_time() -> u64 {
  300
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconcileConfig {
  /// What happens to an optimistic toggle whose write failed: revert or keep
  #[serde(default)]
  pub rollback: RollbackPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
  #[serde(default = "default_page_size")]
  pub page_size: u32,
}

impl Default for FeedConfig {
  fn default() -> Self {
    Self {
      page_size: default_page_size(),
    }
  }
}

fn default_page_size() -> u32 {
  9
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./snapgram.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/snapgram/config.yaml
  ///
  /// SNAPGRAM_ENDPOINT and SNAPGRAM_PROJECT override the file.
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
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/snapgram/config.yaml\n\
                 See config.example.yaml for the format."
        ))
      }
    };

    config.apply_env_overrides(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("snapgram.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("snapgram").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
    if let Some(endpoint) = var("SNAPGRAM_ENDPOINT") {
      self.appwrite.endpoint = endpoint;
    }
    if let Some(project) = var("SNAPGRAM_PROJECT") {
      self.appwrite.project_id = project;
    }
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.appwrite.endpoint)
      .map_err(|e| eyre!("Invalid appwrite.endpoint '{}': {}", self.appwrite.endpoint, e))?;
    if self.feed.page_size == 0 {
      return Err(eyre!("feed.page_size must be at least 1"));
    }
    self.cache.stale_time()?;
    Ok(())
  }

  /// Get the account password from environment variables.
  ///
  /// Checks SNAPGRAM_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("SNAPGRAM_PASSWORD")
      .map_err(|_| eyre!("Password not found. Pass --password or set SNAPGRAM_PASSWORD."))
  }
}
