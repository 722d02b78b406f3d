//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::pages::{CachedPages, NextCursor, Page, StoredPage};
use super::storage::{CacheStorage, CachedEntry};
use super::traits::{CacheKey, CacheResult, CacheSource, Cacheable, QueryKey};
use crate::error::{GatewayError, GatewayResult};

type Flight = Shared<BoxFuture<'static, GatewayResult<Value>>>;

struct InFlight {
  id: u64,
  future: Flight,
  /// Set when the key is invalidated while the load runs
  invalidated: bool,
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the gateway. Reads go through
/// `fetch`/`fetch_page`; concurrent reads of one key share a single load.
/// Mutations call `invalidate` with their invalidation set once they succeed.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  flights: Arc<Mutex<HashMap<CacheKey, InFlight>>>,
  next_flight: Arc<AtomicU64>,
  invalidations: broadcast::Sender<CacheKey>,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    let (invalidations, _) = broadcast::channel(64);
    Self {
      storage: Arc::new(storage),
      flights: Arc::new(Mutex::new(HashMap::new())),
      next_flight: Arc::new(AtomicU64::new(0)),
      invalidations,
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Check if cached data is stale based on cached_at timestamp.
  fn is_expired(&self, cached_at: chrono::DateTime<Utc>) -> bool {
    Utc::now() - cached_at > self.stale_time
  }

  fn is_fresh(&self, entry: &CachedEntry) -> bool {
    !entry.stale && !self.is_expired(entry.cached_at)
  }

  fn lock_flights(&self) -> MutexGuard<'_, HashMap<CacheKey, InFlight>> {
    self.flights.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Receive every prefix passed to `invalidate`.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
    self.invalidations.subscribe()
  }

  /// Whether a read of `key` would go to the network.
  pub fn needs_fetch(&self, key: &impl QueryKey) -> bool {
    let key = key.to_cache_key();
    match self.storage.get_entry(&key) {
      Some(entry) => !self.is_fresh(&entry),
      None => match self.storage.get_pages(&key) {
        Some(seq) => seq.stale || self.is_expired(seq.cached_at),
        None => true,
      },
    }
  }

  /// Join the load in flight for `key`, or start one with `loader`.
  /// Returns the flight id and the shared future.
  fn join_or_start<T, F, Fut>(
    &self,
    flights: &mut HashMap<CacheKey, InFlight>,
    key: &CacheKey,
    loader: F,
  ) -> (u64, Flight)
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = GatewayResult<T>> + Send + 'static,
  {
    if let Some(flight) = flights.get(key) {
      debug!(key = %key, "joining in-flight load");
      return (flight.id, flight.future.clone());
    }

    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
    let load = loader();
    let future = async move {
      let data = load.await?;
      serde_json::to_value(data).map_err(GatewayError::from)
    }
    .boxed()
    .shared();

    debug!(key = %key, flight = id, "starting load");
    flights.insert(
      key.clone(),
      InFlight {
        id,
        future: future.clone(),
        invalidated: false,
      },
    );
    (id, future)
  }

  /// Retire a finished flight. Only the first waiter to get here sees
  /// `Some(invalidated)`; later waiters of the same flight see `None`.
  fn settle(&self, key: &CacheKey, flight_id: u64) -> Option<bool> {
    let mut flights = self.lock_flights();
    match flights.get(key) {
      Some(flight) if flight.id == flight_id => flights.remove(key).map(|f| f.invalidated),
      _ => None,
    }
  }

  /// Fetch a query result with cache-first strategy.
  ///
  /// 1. Fresh cache entry - return immediately
  /// 2. Load in flight for this key - await it instead of loading again
  /// 3. Otherwise run `loader` and store its result
  /// 4. On a transport failure, serve the previous value if there is one
  pub async fn fetch<T, F, Fut>(&self, key: &impl QueryKey, loader: F) -> GatewayResult<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = GatewayResult<T>> + Send + 'static,
  {
    let key = key.to_cache_key();

    let (flight_id, flight, previous) = {
      let mut flights = self.lock_flights();
      let previous = self.storage.get_entry(&key);

      if let Some(entry) = &previous {
        if self.is_fresh(entry) {
          debug!(key = %key, "cache hit");
          let data = serde_json::from_value(entry.value.clone())?;
          return Ok(CacheResult::from_cache(data, entry.cached_at));
        }
      }

      let (id, future) = self.join_or_start(&mut flights, &key, loader);
      (id, future, previous)
    };

    let result = flight.await;
    let settled = self.settle(&key, flight_id);

    match result {
      Ok(value) => {
        if let Some(invalidated) = settled {
          self.storage.store_entry(&key, value.clone(), invalidated);
        }
        Ok(CacheResult::from_network(serde_json::from_value(value)?))
      }
      Err(e) => {
        if e.is_not_found() && settled.is_some() {
          self.storage.remove(&key);
        }
        match previous {
          Some(entry) if e.is_transport() => {
            warn!(key = %key, error = %e, "load failed, serving cached value");
            let data = serde_json::from_value(entry.value)?;
            Ok(CacheResult::offline(data, entry.cached_at))
          }
          _ => Err(e),
        }
      }
    }
  }

  /// Fetch one page of a cursor-paginated query.
  ///
  /// `loader` receives the cursor (`None` for the first page). The next cursor
  /// is the cache key of the last item, or `End` for an empty page. Retained
  /// pages are served from cache while the sequence is fresh.
  pub async fn fetch_page<T, F, Fut>(
    &self,
    key: &impl QueryKey,
    cursor: Option<&str>,
    loader: F,
  ) -> GatewayResult<Page<T>>
  where
    T: Cacheable,
    F: FnOnce(Option<String>) -> Fut,
    Fut: Future<Output = GatewayResult<Vec<T>>> + Send + 'static,
  {
    let key = key.to_cache_key();
    let page_key = key.clone().with("#page").with(cursor.unwrap_or(""));

    let (flight_id, flight) = {
      let mut flights = self.lock_flights();

      if let Some(seq) = self.storage.get_pages(&key) {
        if !seq.stale && !self.is_expired(seq.cached_at) {
          if let Some(pos) = seq.position(cursor) {
            debug!(key = %key, cursor = ?cursor, "page cache hit");
            let stored = &seq.pages[pos];
            return Ok(Page {
              cursor: stored.cursor.clone(),
              items: serde_json::from_value(stored.items.clone())?,
              next: stored.next.clone(),
              source: CacheSource::CacheFresh,
            });
          }
        }
      }

      let owned_cursor = cursor.map(String::from);
      self.join_or_start(&mut flights, &page_key, move || loader(owned_cursor))
    };

    let value = flight.await;
    let settled = self.settle(&page_key, flight_id);
    let value = value?;

    let items: Vec<T> = serde_json::from_value(value.clone())?;
    let next = match items.last() {
      Some(last) => NextCursor::After(last.cache_key()),
      None => NextCursor::End,
    };

    if let Some(invalidated) = settled {
      self.retain_page(
        &key,
        StoredPage {
          cursor: cursor.map(String::from),
          items: value,
          next: next.clone(),
        },
        invalidated,
      );
    }

    debug!(
      key = %key,
      entity = T::entity_type(),
      count = items.len(),
      end = next.is_end(),
      "page loaded"
    );

    Ok(Page {
      cursor: cursor.map(String::from),
      items,
      next,
      source: CacheSource::Network,
    })
  }

  fn retain_page(&self, key: &CacheKey, page: StoredPage, invalidated: bool) {
    let current = self
      .storage
      .get_pages(key)
      .filter(|seq| !seq.stale && !self.is_expired(seq.cached_at));

    match current {
      Some(mut seq) => {
        if seq.insert(page) {
          seq.stale = invalidated;
          self.storage.store_pages(key, seq);
        } else {
          debug!(key = %key, "page does not extend the sequence, not retained");
        }
      }
      // A first page (re)starts the sequence
      None if page.cursor.is_none() => {
        self.storage.store_pages(key, CachedPages::new(page, invalidated));
      }
      None => {
        debug!(key = %key, "no live sequence for cursor, page not retained");
      }
    }
  }

  /// All retained pages of a paginated query, in order.
  pub fn cached_pages<T: Cacheable>(&self, key: &impl QueryKey) -> GatewayResult<Vec<Page<T>>> {
    let Some(seq) = self.storage.get_pages(&key.to_cache_key()) else {
      return Ok(Vec::new());
    };

    seq
      .pages
      .into_iter()
      .map(|stored| {
        Ok(Page {
          cursor: stored.cursor,
          items: serde_json::from_value(stored.items)?,
          next: stored.next,
          source: CacheSource::CacheFresh,
        })
      })
      .collect()
  }

  /// Mark everything under `prefix` stale and notify observers.
  /// Loads in flight under the prefix will store their result as stale.
  pub fn invalidate(&self, prefix: &impl QueryKey) -> usize {
    let prefix = prefix.to_cache_key();
    {
      let mut flights = self.lock_flights();
      for (_, flight) in flights.iter_mut().filter(|(k, _)| k.starts_with(&prefix)) {
        flight.invalidated = true;
      }
    }

    let count = self.storage.mark_stale(&prefix);
    debug!(prefix = %prefix, count, "invalidated");

    // No receivers is fine
    let _ = self.invalidations.send(prefix);
    count
  }

  /// Drop every cached value.
  pub fn clear(&self) {
    {
      let mut flights = self.lock_flights();
      for flight in flights.values_mut() {
        flight.invalidated = true;
      }
    }
    self.storage.clear();
    let _ = self.invalidations.send(CacheKey::root());
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      flights: Arc::clone(&self.flights),
      next_flight: Arc::clone(&self.next_flight),
      invalidations: self.invalidations.clone(),
      stale_time: self.stale_time,
    }
  }
}
