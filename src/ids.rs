//! Client-side generation of document and file ids.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique, roughly time-ordered id.
///
/// Layout: 8 hex chars of unix seconds, 5 hex chars of sub-second micros, then
/// 7 hex chars of a digest over the nanosecond clock, process id and a counter.
/// 20 chars total, within the platform's `[a-zA-Z0-9._-]{1,36}` id rule.
pub fn unique() -> String {
  let now = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default();
  let count = COUNTER.fetch_add(1, Ordering::Relaxed);

  let mut hasher = Sha256::new();
  hasher.update(now.as_nanos().to_le_bytes());
  hasher.update(std::process::id().to_le_bytes());
  hasher.update(count.to_le_bytes());
  let digest = hex::encode(hasher.finalize());

  format!(
    "{:08x}{:05x}{}",
    now.as_secs(),
    now.subsec_micros(),
    &digest[..7]
  )
}
