//! Async query abstraction for data fetching with caching support.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! encapsulates async data fetching, loading states, and error handling,
//! a `Mutation<I, O>` handle for writes, and an `InfiniteQuery<T>` for
//! cursor-paginated feeds.
//!
//! # Example
//!
//! ```ignore
//! let client = cached_client.clone();
//! let mut query = Query::new(move || {
//!     let client = client.clone();
//!     async move { client.recent_posts().await }
//! })
//! .observing(cache.subscribe(), SnapgramQueryKey::RecentPosts.to_cache_key());
//!
//! // Start fetching
//! query.fetch();
//!
//! // In event loop tick; also refetches after a matching invalidation
//! if query.poll() {
//!     // State changed, redraw
//! }
//!
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(posts) => render_posts(posts),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::cache::{CacheKey, CacheLayer, Cacheable, NextCursor, Page, QueryKey};
use crate::error::{GatewayError, GatewayResult};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(GatewayError),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&GatewayError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A boxed future that returns a GatewayResult<T>
type BoxFuture<T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Invalidation feed a query listens to, and the key it cares about
struct Observer {
  receiver: broadcast::Receiver<CacheKey>,
  key: CacheKey,
}

impl Observer {
  /// Drain pending notifications; true if any covered our key.
  fn invalidated(&mut self) -> bool {
    let mut hit = false;
    loop {
      match self.receiver.try_recv() {
        Ok(prefix) => hit |= self.key.starts_with(&prefix),
        // Missed notifications might have covered us
        Err(broadcast::error::TryRecvError::Lagged(_)) => hit = true,
        Err(_) => break,
      }
    }
    hit
  }
}

/// Async query for data fetching with state management.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure)
/// - Loading/success/error states
/// - Async result handling via channels
/// - Refetching when the cache invalidates the key it observes
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<GatewayResult<T>>>,
  observer: Option<Observer>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It will be called
  /// each time `fetch()` or `refetch()` is invoked.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GatewayResult<T>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      observer: None,
      fetched_at: None,
      stale_time: Duration::from_secs(60), // Default 1 minute
    }
  }

  /// Set the stale time for this query.
  ///
  /// After this duration, the data is considered stale and `is_stale()` returns true.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// Refetch whenever `invalidations` carries a prefix of `key`.
  pub fn observing(mut self, invalidations: broadcast::Receiver<CacheKey>, key: CacheKey) -> Self {
    self.observer = Some(Observer {
      receiver: invalidations,
      key,
    });
    self
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the query succeeded.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  /// Check if the query is currently loading.
  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// Check if the query succeeded.
  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  /// Check if the query failed.
  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  /// Get the error if the query failed.
  pub fn error(&self) -> Option<&GatewayError> {
    self.state.error()
  }

  /// Check if the data is stale (older than stale_time).
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => self
        .fetched_at
        .map(|t| t.elapsed() > self.stale_time)
        .unwrap_or(true),
      _ => false,
    }
  }

  /// Start fetching data if not already loading.
  ///
  /// This is a no-op if the query is already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    // Cancel any pending fetch by dropping the receiver
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for results from a pending fetch, and for invalidations.
  ///
  /// Returns `true` if the state changed (data arrived, error occurred, or
  /// an invalidation started a refetch). Call this in your event loop tick.
  pub fn poll(&mut self) -> bool {
    let invalidated = self.observer.as_mut().is_some_and(Observer::invalidated);
    if invalidated && !matches!(self.state, QueryState::Idle) {
      debug!("observed key invalidated, refetching");
      self.refetch();
      return true;
    }

    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.state = QueryState::Success(data);
        self.fetched_at = Some(Instant::now());
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.state = QueryState::Error(GatewayError::Transport("query was cancelled".to_string()));
        self.receiver = None;
        true
      }
    }
  }

  /// Wait for the pending fetch to settle. Returns the final state.
  pub async fn settle(&mut self) -> &QueryState<T> {
    if let Some(rx) = &mut self.receiver {
      let result = rx.recv().await;
      self.receiver = None;
      self.state = match result {
        Some(Ok(data)) => {
          self.fetched_at = Some(Instant::now());
          QueryState::Success(data)
        }
        Some(Err(e)) => QueryState::Error(e),
        None => QueryState::Error(GatewayError::Transport("query was cancelled".to_string())),
      };
    }
    &self.state
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

// Query is not Clone because the fetcher is boxed and receiver is owned.
// If you need to share a query, wrap it in Arc<Mutex<Query<T>>>.

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}

// ============================================================================
// Mutation
// ============================================================================

/// The state of a mutation
#[derive(Debug, Clone)]
pub enum MutationState<O> {
  Idle,
  Pending,
  Success(O),
  Error(GatewayError),
}

type MutatorFn<I, O> = Box<dyn Fn(I) -> BoxFuture<O> + Send + Sync>;

/// Handle for a write. Each `mutate` runs to completion; the state reflects
/// the most recent call.
pub struct Mutation<I, O> {
  state: MutationState<O>,
  mutator: MutatorFn<I, O>,
  receiver: Option<mpsc::UnboundedReceiver<GatewayResult<O>>>,
}

impl<I: Send + 'static, O: Send + 'static> Mutation<I, O> {
  pub fn new<F, Fut>(mutator: F) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GatewayResult<O>> + Send + 'static,
  {
    Self {
      state: MutationState::Idle,
      mutator: Box::new(move |input| Box::pin(mutator(input))),
      receiver: None,
    }
  }

  pub fn state(&self) -> &MutationState<O> {
    &self.state
  }

  pub fn is_pending(&self) -> bool {
    matches!(self.state, MutationState::Pending)
  }

  /// Run the write. A write already pending is not cancelled, only no
  /// longer reported.
  pub fn mutate(&mut self, input: I) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = MutationState::Pending;

    let future = (self.mutator)(input);
    tokio::spawn(async move {
      let _ = tx.send(future.await);
    });
  }

  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };

    let next = match receiver.try_recv() {
      Ok(Ok(output)) => MutationState::Success(output),
      Ok(Err(e)) => MutationState::Error(e),
      Err(mpsc::error::TryRecvError::Empty) => return false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        MutationState::Error(GatewayError::Transport("mutation was cancelled".to_string()))
      }
    };
    self.state = next;
    self.receiver = None;
    true
  }
}

// ============================================================================
// Infinite query
// ============================================================================

type PageLoaderFn<T> = Arc<dyn Fn(Option<String>) -> BoxFuture<Vec<T>> + Send + Sync>;

/// Cursor-paginated query over a `CacheLayer`.
///
/// Pages are requested in order; the cursor for the next page is the id of
/// the last item of the previous one. An empty page ends the sequence. After
/// an invalidation of the key the next fetch starts again from the first page.
pub struct InfiniteQuery<T> {
  cache: CacheLayer,
  key: CacheKey,
  loader: PageLoaderFn<T>,
  pages: Vec<Page<T>>,
  invalidations: broadcast::Receiver<CacheKey>,
}

impl<T: Cacheable> InfiniteQuery<T> {
  pub fn new<F, Fut>(cache: CacheLayer, key: impl QueryKey, loader: F) -> Self
  where
    F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GatewayResult<Vec<T>>> + Send + 'static,
  {
    let invalidations = cache.subscribe();
    Self {
      key: key.to_cache_key(),
      loader: Arc::new(move |cursor| Box::pin(loader(cursor))),
      pages: Vec::new(),
      invalidations,
      cache,
    }
  }

  pub fn pages(&self) -> &[Page<T>] {
    &self.pages
  }

  /// Every loaded item, in page order.
  pub fn items(&self) -> impl Iterator<Item = &T> {
    self.pages.iter().flat_map(|p| p.items.iter())
  }

  /// False once a page came back empty.
  pub fn has_next_page(&self) -> bool {
    self.pages.last().map_or(true, |p| !p.next.is_end())
  }

  fn drop_if_invalidated(&mut self) {
    let mut hit = false;
    loop {
      match self.invalidations.try_recv() {
        Ok(prefix) => hit |= self.key.starts_with(&prefix),
        Err(broadcast::error::TryRecvError::Lagged(_)) => hit = true,
        Err(_) => break,
      }
    }
    if hit && !self.pages.is_empty() {
      debug!(key = %self.key, "sequence invalidated, restarting from first page");
      self.pages.clear();
    }
  }

  /// Load the page after the last one held. Returns `None` without a
  /// request when the sequence has ended.
  pub async fn fetch_next_page(&mut self) -> GatewayResult<Option<&Page<T>>> {
    self.drop_if_invalidated();

    let cursor = match self.pages.last().map(|p| &p.next) {
      None => None,
      Some(NextCursor::After(id)) => Some(id.clone()),
      Some(NextCursor::End) => return Ok(None),
    };

    let loader = Arc::clone(&self.loader);
    let page = self
      .cache
      .fetch_page(&self.key, cursor.as_deref(), move |cursor| loader(cursor))
      .await?;

    self.pages.push(page);
    Ok(self.pages.last())
  }

  /// Drop every held page and load the first one again.
  pub async fn refresh(&mut self) -> GatewayResult<Option<&Page<T>>> {
    self.pages.clear();
    self.fetch_next_page().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use serde::{Deserialize, Serialize};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(|| async { Ok(vec![1, 2, 3]) });

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());

    // Wait for the result
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_success());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let mut query: Query<i32> = Query::new(|| async { Err(GatewayError::Unauthenticated) });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_error());
    assert_eq!(query.error(), Some(&GatewayError::Unauthenticated));
  }

  #[tokio::test]
  async fn test_query_stale() {
    let mut query = Query::new(|| async { Ok(42) }).with_stale_time(Duration::ZERO);

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();

    // With zero stale time, should immediately be stale
    assert!(query.is_stale());
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let mut query = Query::new(|| async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok(42)
    });

    query.fetch();
    assert!(query.is_loading());

    // Second fetch should be no-op
    query.fetch();
    assert!(query.is_loading());
  }

  #[tokio::test]
  async fn test_refetch_cancels_pending() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(move || {
      let counter = counter_clone.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(counter.fetch_add(1, Ordering::SeqCst))
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Refetch should cancel the first and start a new one
    query.refetch();
    tokio::time::sleep(Duration::from_millis(100)).await;

    query.poll();
    // Only the second fetch should have completed and been received
    assert_eq!(query.data(), Some(&1));
  }

  fn counting_query(cache: &CacheLayer, key: CacheKey, loads: Arc<AtomicU32>) -> Query<u32> {
    let fetch_cache = cache.clone();
    let fetch_key = key.clone();
    Query::new(move || {
      let cache = fetch_cache.clone();
      let key = fetch_key.clone();
      let loads = loads.clone();
      async move {
        cache
          .fetch(&key, move || async move { Ok(loads.fetch_add(1, Ordering::SeqCst)) })
          .await
          .map(|r| r.data)
      }
    })
    .observing(cache.subscribe(), key)
  }

  #[tokio::test]
  async fn test_invalidation_triggers_refetch() {
    let cache = CacheLayer::new(MemoryStorage::new());
    let loads = Arc::new(AtomicU32::new(0));
    let key = CacheKey::new("getPostById").with("p1");
    let mut query = counting_query(&cache, key, loads.clone());

    query.fetch();
    assert_eq!(query.settle().await.data(), Some(&0));
    assert!(!query.poll());

    cache.invalidate(&CacheKey::new("getPostById"));
    assert!(query.poll());
    assert!(query.is_loading());
    assert_eq!(query.settle().await.data(), Some(&1));
    assert_eq!(loads.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_unrelated_invalidation_is_ignored() {
    let cache = CacheLayer::new(MemoryStorage::new());
    let loads = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&cache, CacheKey::new("getPostById").with("p1"), loads.clone());

    query.fetch();
    query.settle().await;

    cache.invalidate(&CacheKey::new("getPostById").with("p2"));
    cache.invalidate(&CacheKey::new("getPost"));
    assert!(!query.poll());
    assert_eq!(loads.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_idle_query_ignores_invalidation() {
    let cache = CacheLayer::new(MemoryStorage::new());
    let loads = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&cache, CacheKey::new("getUsers"), loads.clone());

    cache.clear();
    assert!(!query.poll());
    assert!(matches!(query.state(), QueryState::Idle));
  }

  #[tokio::test]
  async fn test_mutation_states() {
    let mut mutation = Mutation::new(|n: u32| async move {
      if n == 0 {
        Err(GatewayError::InvalidInput("zero".to_string()))
      } else {
        Ok(n * 2)
      }
    });
    assert!(matches!(mutation.state(), MutationState::Idle));

    mutation.mutate(21);
    assert!(mutation.is_pending());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(mutation.poll());
    assert!(matches!(mutation.state(), MutationState::Success(42)));

    mutation.mutate(0);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(mutation.poll());
    assert!(matches!(mutation.state(), MutationState::Error(GatewayError::InvalidInput(_))));
    assert!(!mutation.poll());
  }

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Item {
    id: String,
  }

  impl Cacheable for Item {
    fn cache_key(&self) -> String {
      self.id.clone()
    }

    fn entity_type() -> &'static str {
      "item"
    }
  }

  /// Pages of `size` over ids 0..total, newest first, recording each cursor.
  fn feed(
    cache: &CacheLayer,
    items: Arc<Mutex<Vec<u32>>>,
    size: usize,
    cursors: Arc<Mutex<Vec<Option<String>>>>,
  ) -> InfiniteQuery<Item> {
    InfiniteQuery::new(cache.clone(), CacheKey::new("getInfinitePosts"), move |cursor| {
      let items = items.clone();
      let cursors = cursors.clone();
      async move {
        cursors.lock().unwrap().push(cursor.clone());
        let all: Vec<u32> = items.lock().unwrap().clone();
        let start = match &cursor {
          Some(c) => all.iter().position(|i| i.to_string() == *c).map_or(all.len(), |p| p + 1),
          None => 0,
        };
        Ok(
          all[start..]
            .iter()
            .take(size)
            .map(|i| Item { id: i.to_string() })
            .collect(),
        )
      }
    })
  }

  #[tokio::test]
  async fn test_infinite_query_pages_to_end() {
    let cache = CacheLayer::new(MemoryStorage::new());
    let items = Arc::new(Mutex::new((0..5).rev().collect::<Vec<u32>>()));
    let cursors = Arc::new(Mutex::new(Vec::new()));
    let mut query = feed(&cache, items, 2, cursors.clone());

    assert!(query.has_next_page());
    while query.has_next_page() {
      query.fetch_next_page().await.unwrap();
    }

    let ids: Vec<&str> = query.items().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["4", "3", "2", "1", "0"]);
    assert_eq!(query.pages().len(), 4);

    // Ended: no further request
    assert!(query.fetch_next_page().await.unwrap().is_none());
    assert_eq!(
      *cursors.lock().unwrap(),
      vec![None, Some("3".to_string()), Some("1".to_string()), Some("0".to_string())]
    );
  }

  #[tokio::test]
  async fn test_infinite_query_restarts_after_invalidation() {
    let cache = CacheLayer::new(MemoryStorage::new());
    let items = Arc::new(Mutex::new((0..4).rev().collect::<Vec<u32>>()));
    let cursors = Arc::new(Mutex::new(Vec::new()));
    let mut query = feed(&cache, items.clone(), 2, cursors);

    query.fetch_next_page().await.unwrap();
    items.lock().unwrap().insert(0, 9);
    cache.invalidate(&CacheKey::new("getInfinitePosts"));

    let first = query.fetch_next_page().await.unwrap().unwrap();
    assert_eq!(first.cursor, None);
    assert_eq!(first.items[0].id, "9");

    query.fetch_next_page().await.unwrap();
    let ids: Vec<&str> = query.items().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["9", "3", "2", "1"]);
  }
}
