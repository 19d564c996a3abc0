mod store;

pub use store::{FileStore, MemoryStore};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RateLimitConfig;
use crate::error::Result;

/// Outcome of a single `check` call against a sliding window (§4.6).
#[derive(Debug, Clone, Copy)]
pub struct CheckOutcome {
  pub allowed: bool,
  pub remaining: u32,
  /// Absolute epoch seconds at which the oldest counted request falls out
  /// of the window (used for both `X-RateLimit-Reset` and `retry_after`).
  pub reset_at: i64,
}

/// Narrow capability interface a rate-limit backend must provide (Design
/// Notes §9). `record` is the one atomic operation: implementations must
/// perform the drop-expired / compare-to-limit / append-and-persist
/// sequence under a single lock so concurrent callers for the same
/// identifier never observe a torn count.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
  async fn record(
    &self,
    identifier: &str,
    now: i64,
    window_seconds: u64,
    max_requests: u32,
  ) -> Result<CheckOutcome>;
}

/// Sliding-window counter (§4.6). Delegates the atomic bookkeeping to a
/// pluggable `RateLimitStore` so the algorithm is identical whether the
/// backing store is in-process memory (single node) or a file/remote store
/// (multi-node -- Design Notes §9 explicitly forbids relying on the
/// file-based store's POSIX semantics past a single node).
pub struct RateLimiter {
  config: RateLimitConfig,
  store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
  pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
    return Self { config, store };
  }

  pub fn enabled(&self) -> bool {
    return self.config.enabled;
  }

  pub fn max_requests(&self) -> u32 {
    return self.config.max_requests;
  }

  pub fn window_seconds(&self) -> u64 {
    return self.config.window_seconds;
  }

  pub async fn check(&self, identifier: &str) -> Result<CheckOutcome> {
    let now = chrono::Utc::now().timestamp();
    return self
      .store
      .record(identifier, now, self.config.window_seconds, self.config.max_requests)
      .await;
  }
}

/// Drops entries at or before the window cutoff, then decides allow/deny
/// and computes the outcome -- the pure algorithmic core shared by every
/// `RateLimitStore` implementation so they only differ in how the sequence
/// is persisted.
pub(crate) fn slide_and_decide(
  sequence: &mut Vec<i64>,
  now: i64,
  window_seconds: u64,
  max_requests: u32,
) -> CheckOutcome {
  let cutoff = now - window_seconds as i64;
  sequence.retain(|ts| *ts > cutoff);

  if sequence.len() as u32 >= max_requests {
    let oldest = sequence.first().copied().unwrap_or(now);
    return CheckOutcome {
      allowed: false,
      remaining: 0,
      reset_at: oldest + window_seconds as i64,
    };
  }

  sequence.push(now);
  let remaining = max_requests - sequence.len() as u32;
  let reset_at = sequence.first().copied().unwrap_or(now) + window_seconds as i64;
  return CheckOutcome {
    allowed: true,
    remaining,
    reset_at,
  };
}

pub type Sequences = HashMap<String, Vec<i64>>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allows_up_to_the_limit_then_denies() {
    let mut seq = vec![];
    for i in 0..3 {
      let outcome = slide_and_decide(&mut seq, 1000 + i, 60, 3);
      assert!(outcome.allowed, "request {i} should be allowed");
    }
    let outcome = slide_and_decide(&mut seq, 1003, 60, 3);
    assert!(!outcome.allowed);
    assert_eq!(outcome.remaining, 0);
  }

  #[test]
  fn expired_entries_fall_out_of_the_window() {
    let mut seq = vec![1000, 1010, 1020];
    // now = 1100, window = 60 -> cutoff = 1040, all three expire.
    let outcome = slide_and_decide(&mut seq, 1100, 60, 3);
    assert!(outcome.allowed);
    assert_eq!(seq, vec![1100]);
  }
}
