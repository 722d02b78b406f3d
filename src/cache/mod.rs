//! Generic query cache for data read through the gateway.
//!
//! This module is backend-agnostic. It provides:
//! - Read-through fetching keyed by structural `CacheKey`s
//! - Single-flight loads (concurrent reads of one key share a request)
//! - Prefix invalidation with a broadcast to live observers
//! - Cursor-paginated sequences whose cursor is the last item's cache key
//! - Basic offline mode (serve the last value when the network is unavailable)

mod layer;
mod pages;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use pages::{NextCursor, Page};
pub use storage::{MemoryStorage, NoopStorage};
pub use traits::{CacheKey, CacheResult, CacheSource, Cacheable, QueryKey};
