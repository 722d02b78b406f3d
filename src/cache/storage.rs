//! Cache storage trait and in-memory implementation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::pages::CachedPages;
use super::traits::CacheKey;

/// A single cached query result.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// The cached value, serialized
  pub value: Value,
  /// When the value was stored
  pub cached_at: DateTime<Utc>,
  /// Set by invalidation; the next read reloads
  pub stale: bool,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get a cached query result.
  fn get_entry(&self, key: &CacheKey) -> Option<CachedEntry>;

  /// Store a query result.
  fn store_entry(&self, key: &CacheKey, value: Value, stale: bool);

  /// Drop a query result (and any pages under the same key).
  fn remove(&self, key: &CacheKey);

  /// Get the retained pages of a paginated query.
  fn get_pages(&self, key: &CacheKey) -> Option<CachedPages>;

  /// Replace the retained pages of a paginated query.
  fn store_pages(&self, key: &CacheKey, pages: CachedPages);

  /// Mark every entry and page sequence under `prefix` stale.
  /// Returns how many were affected.
  fn mark_stale(&self, prefix: &CacheKey) -> usize;

  /// Drop everything.
  fn clear(&self);
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - every read goes to the network.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get_entry(&self, _key: &CacheKey) -> Option<CachedEntry> {
    None // Always miss
  }

  fn store_entry(&self, _key: &CacheKey, _value: Value, _stale: bool) {}

  fn remove(&self, _key: &CacheKey) {}

  fn get_pages(&self, _key: &CacheKey) -> Option<CachedPages> {
    None
  }

  fn store_pages(&self, _key: &CacheKey, _pages: CachedPages) {}

  fn mark_stale(&self, _prefix: &CacheKey) -> usize {
    0
  }

  fn clear(&self) {}
}

#[derive(Default)]
struct Entries {
  values: HashMap<CacheKey, CachedEntry>,
  pages: HashMap<CacheKey, CachedPages>,
}

/// Process-local cache storage.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<Entries>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Entries> {
    // Entries stay consistent even if a holder panicked: every write is a
    // single insert or flag flip.
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl CacheStorage for MemoryStorage {
  fn get_entry(&self, key: &CacheKey) -> Option<CachedEntry> {
    self.lock().values.get(key).cloned()
  }

  fn store_entry(&self, key: &CacheKey, value: Value, stale: bool) {
    self.lock().values.insert(
      key.clone(),
      CachedEntry {
        value,
        cached_at: Utc::now(),
        stale,
      },
    );
  }

  fn remove(&self, key: &CacheKey) {
    let mut entries = self.lock();
    entries.values.remove(key);
    entries.pages.remove(key);
  }

  fn get_pages(&self, key: &CacheKey) -> Option<CachedPages> {
    self.lock().pages.get(key).cloned()
  }

  fn store_pages(&self, key: &CacheKey, pages: CachedPages) {
    self.lock().pages.insert(key.clone(), pages);
  }

  fn mark_stale(&self, prefix: &CacheKey) -> usize {
    let mut entries = self.lock();
    let mut count = 0;

    for (_, entry) in entries.values.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
      entry.stale = true;
      count += 1;
    }
    for (_, seq) in entries.pages.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
      seq.stale = true;
      count += 1;
    }

    count
  }

  fn clear(&self) {
    let mut entries = self.lock();
    entries.values.clear();
    entries.pages.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::pages::{NextCursor, StoredPage};
  use serde_json::json;

  #[test]
  fn test_mark_stale_respects_segments() {
    let storage = MemoryStorage::new();
    let by_id = CacheKey::new("getPostById").with("p1");
    let recent = CacheKey::new("getRecentPosts");
    let other = CacheKey::new("getPostByIdLegacy").with("p1");

    storage.store_entry(&by_id, json!({"id": "p1"}), false);
    storage.store_entry(&recent, json!([]), false);
    storage.store_entry(&other, json!({}), false);

    assert_eq!(storage.mark_stale(&CacheKey::new("getPostById")), 1);
    assert!(storage.get_entry(&by_id).unwrap().stale);
    assert!(!storage.get_entry(&recent).unwrap().stale);
    assert!(!storage.get_entry(&other).unwrap().stale);
  }

  #[test]
  fn test_mark_stale_covers_pages() {
    let storage = MemoryStorage::new();
    let key = CacheKey::new("getInfinitePosts");
    storage.store_pages(
      &key,
      CachedPages::new(
        StoredPage {
          cursor: None,
          items: json!([]),
          next: NextCursor::End,
        },
        false,
      ),
    );

    assert_eq!(storage.mark_stale(&CacheKey::root()), 1);
    assert!(storage.get_pages(&key).unwrap().stale);
  }

  #[test]
  fn test_noop_always_misses() {
    let storage = NoopStorage;
    let key = CacheKey::new("getCurrentUser");
    storage.store_entry(&key, json!({}), false);
    assert!(storage.get_entry(&key).is_none());
  }
}
