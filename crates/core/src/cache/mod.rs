mod store;

pub use store::{FileStore, MemoryStore};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::{CacheConfig, CacheVaryBy};
use crate::error::Result;

/// `key → {payload, storedAt, ttl}` (§3, §4.7).
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub payload: Vec<u8>,
  pub stored_at: i64,
  pub ttl: u64,
}

impl CacheEntry {
  pub fn is_expired(&self, now: i64) -> bool {
    return now >= self.stored_at + self.ttl as i64;
  }
}

/// Narrow capability interface for a cache backend (Design Notes §9):
/// `{get,set,delete,deletePattern,clear,has,stats}`. `delete_pattern` is
/// keyed by the table-prefix segment of the key, not a full scan of every
/// payload -- both implementations encode the table name as a literal key
/// prefix for exactly this reason.
#[async_trait]
pub trait CacheStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
  async fn set(&self, key: &str, entry: CacheEntry) -> Result<()>;
  async fn delete(&self, key: &str) -> Result<()>;
  async fn delete_pattern(&self, table_prefix: &str) -> Result<()>;
  async fn clear(&self) -> Result<()>;
  async fn has(&self, key: &str) -> Result<bool> {
    return Ok(self.get(key).await?.is_some());
  }
}

/// Keys are `"{table}:{fingerprint}"`. The table prefix is what makes
/// `invalidate_table` a targeted deletion rather than a full scan; the
/// fingerprint is a SHA-256 of the normalized, sorted query string plus any
/// `varyBy` segments (§4.7).
pub fn cache_key(table: &str, query: &BTreeMap<String, String>, vary: &[String]) -> String {
  let mut hasher = Sha256::new();
  for (k, v) in query {
    hasher.update(k.as_bytes());
    hasher.update(b"=");
    hasher.update(v.as_bytes());
    hasher.update(b"&");
  }
  for segment in vary {
    hasher.update(b"|vary:");
    hasher.update(segment.as_bytes());
  }
  let digest = hasher.finalize();
  return format!("{table}:{digest:x}");
}

/// Builds the `varyBy` segments configured for cache-key segmentation
/// (`api_key`, `user_id`), enabling per-tenant caching.
pub fn vary_segments(vary_by: &[CacheVaryBy], api_key: Option<&str>, user_id: Option<&str>) -> Vec<String> {
  let mut segments = Vec::new();
  for kind in vary_by {
    match kind {
      CacheVaryBy::ApiKey => {
        if let Some(key) = api_key {
          segments.push(format!("apikey:{}", crate::auth::hash_api_key(key)));
        }
      }
      CacheVaryBy::UserId => {
        if let Some(id) = user_id {
          segments.push(format!("user:{id}"));
        }
      }
    }
  }
  return segments;
}

/// Key derivation, TTL resolution, and table-pattern invalidation (§4.7).
/// On a cacheable request, lookup happens strictly after auth + RBAC + rate
/// limit succeed, so cached data never bypasses security (pipeline
/// ordering is enforced by the Router, not here). On a successful
/// mutation, `invalidate_table` MUST run before the success response is
/// committed -- again, the Router is the one that sequences this; this
/// type only guarantees that a single `invalidate_table` call is itself
/// synchronous and globally visible.
pub struct CacheManager {
  config: CacheConfig,
  store: Arc<dyn CacheStore>,
}

impl CacheManager {
  pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
    return Self { config, store };
  }

  pub fn enabled(&self) -> bool {
    return self.config.enabled;
  }

  pub fn should_cache(&self, table: &str) -> bool {
    return self.config.enabled && !self.config.exclude_tables.contains(table);
  }

  pub fn ttl_for(&self, table: &str) -> u64 {
    return self.config.per_table.get(table).copied().unwrap_or(self.config.ttl);
  }

  pub fn vary_by(&self) -> &[CacheVaryBy] {
    return &self.config.vary_by;
  }

  pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let Some(entry) = self.store.get(key).await? else {
      return Ok(None);
    };
    if entry.is_expired(chrono::Utc::now().timestamp()) {
      self.store.delete(key).await?;
      return Ok(None);
    }
    return Ok(Some(entry.payload));
  }

  pub async fn set(&self, key: &str, payload: Vec<u8>, table: &str) -> Result<()> {
    let entry = CacheEntry {
      payload,
      stored_at: chrono::Utc::now().timestamp(),
      ttl: self.ttl_for(table),
    };
    return self.store.set(key, entry).await;
  }

  /// MUST delete every key whose table component equals `table` (§4.7,
  /// invariant 10 idempotent invalidation in §8: applying this twice has
  /// the same effect as once, since deleting an already-absent key is a
  /// no-op in every store implementation here).
  pub async fn invalidate_table(&self, table: &str) -> Result<()> {
    return self.store.delete_pattern(&format!("{table}:")).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cache_key_is_deterministic_and_order_independent() {
    let mut query_a = BTreeMap::new();
    query_a.insert("page".to_string(), "1".to_string());
    query_a.insert("filter".to_string(), "age:gte:18".to_string());

    let mut query_b = BTreeMap::new();
    query_b.insert("filter".to_string(), "age:gte:18".to_string());
    query_b.insert("page".to_string(), "1".to_string());

    assert_eq!(cache_key("users", &query_a, &[]), cache_key("users", &query_b, &[]));
  }

  #[test]
  fn cache_key_differs_by_table_and_vary_segment() {
    let query = BTreeMap::new();
    let k1 = cache_key("users", &query, &[]);
    let k2 = cache_key("products", &query, &[]);
    assert_ne!(k1, k2);
    assert!(k1.starts_with("users:"));

    let k3 = cache_key("users", &query, &["user:1".to_string()]);
    assert_ne!(k1, k3);
  }
}
