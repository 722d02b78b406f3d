//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Trait for entities that can be cached.
///
/// Implementors must provide a unique cache key. Paginated sequences use the
/// cache key of the last item of a page as the cursor for the next one.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this entity (e.g., post id, user id)
  fn cache_key(&self) -> String;

  /// Entity type name used in log output (e.g., "post", "user")
  fn entity_type() -> &'static str;
}

/// Structured cache key: an operation name followed by its parameters.
///
/// Matching is segment-wise, so `["getPostById"]` is a prefix of
/// `["getPostById", "p1"]` but `["getPost"]` is not. The empty key is a
/// prefix of every key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
  pub fn new(operation: impl Into<String>) -> Self {
    Self(vec![operation.into()])
  }

  /// The key that matches everything.
  pub fn root() -> Self {
    Self(Vec::new())
  }

  pub fn with(mut self, segment: impl Into<String>) -> Self {
    self.0.push(segment.into());
    self
  }

  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    self.0.starts_with(&prefix.0)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.0.is_empty() {
      return f.write_str("*");
    }
    f.write_str(&self.0.join("/"))
  }
}

/// Typed query identifiers convert into structural cache keys.
pub trait QueryKey {
  fn to_cache_key(&self) -> CacheKey;

  /// Human-readable description for logging
  fn description(&self) -> String;
}

impl QueryKey for CacheKey {
  fn to_cache_key(&self) -> CacheKey {
    self.clone()
  }

  fn description(&self) -> String {
    self.to_string()
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Network failed, serving the last value we had
  Offline,
}
