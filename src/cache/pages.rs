//! Types for cursor-paginated sequences.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::traits::CacheSource;

/// Where the next page of a sequence starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextCursor {
  /// Fetch the page after the entity with this id
  After(String),
  /// The last page was empty; there is nothing more to fetch
  End,
}

impl NextCursor {
  pub fn as_cursor(&self) -> Option<&str> {
    match self {
      NextCursor::After(id) => Some(id),
      NextCursor::End => None,
    }
  }

  pub fn is_end(&self) -> bool {
    matches!(self, NextCursor::End)
  }
}

/// A single page delivered to callers.
#[derive(Debug, Clone)]
pub struct Page<T> {
  /// Cursor this page was requested with (`None` = first page)
  pub cursor: Option<String>,
  pub items: Vec<T>,
  pub next: NextCursor,
  pub source: CacheSource,
}

/// A page as held by storage, items serialized.
#[derive(Debug, Clone)]
pub struct StoredPage {
  pub cursor: Option<String>,
  pub items: Value,
  pub next: NextCursor,
}

/// All retained pages of one paginated key, in fetch order.
#[derive(Debug, Clone)]
pub struct CachedPages {
  pub pages: Vec<StoredPage>,
  pub cached_at: DateTime<Utc>,
  pub stale: bool,
}

impl CachedPages {
  pub fn new(first: StoredPage, stale: bool) -> Self {
    Self {
      pages: vec![first],
      cached_at: Utc::now(),
      stale,
    }
  }

  pub fn position(&self, cursor: Option<&str>) -> Option<usize> {
    self.pages.iter().position(|p| p.cursor.as_deref() == cursor)
  }

  /// Cursor that would extend this sequence, if it isn't exhausted.
  pub fn tail_next(&self) -> Option<&str> {
    self.pages.last().and_then(|p| p.next.as_cursor())
  }

  /// Insert a freshly loaded page. Returns false if the page doesn't belong to
  /// the sequence (neither a refetch of a retained cursor nor its extension).
  ///
  /// Pages are never reordered. A refetched page whose next cursor changed
  /// drops every page after it, since those were fetched from a stale cursor.
  pub fn insert(&mut self, page: StoredPage) -> bool {
    if let Some(pos) = self.position(page.cursor.as_deref()) {
      if self.pages[pos].next != page.next {
        self.pages.truncate(pos + 1);
      }
      self.pages[pos] = page;
      return true;
    }

    if page.cursor.is_some() && self.tail_next() == page.cursor.as_deref() {
      self.pages.push(page);
      return true;
    }

    false
  }
}
