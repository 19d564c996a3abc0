use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use mini_moka::sync::Cache as MokaCache;
use parking_lot::Mutex;

use super::{CacheEntry, CacheStore};
use crate::error::{GatewayError, Result};

/// In-process reference store, matching the reference crate's own choice of
/// `mini-moka` for its in-process cache. `mini-moka` doesn't expose cheap
/// key iteration, so a small side index tracks live keys purely to make
/// `delete_pattern` (table invalidation) a targeted scan instead of
/// depending on cache internals.
pub struct MemoryStore {
  entries: MokaCache<String, CacheEntry>,
  keys: Mutex<HashSet<String>>,
}

impl MemoryStore {
  pub fn new(max_capacity: u64) -> Self {
    return Self {
      entries: MokaCache::builder().max_capacity(max_capacity).build(),
      keys: Mutex::new(HashSet::new()),
    };
  }
}

impl Default for MemoryStore {
  fn default() -> Self {
    return Self::new(10_000);
  }
}

#[async_trait]
impl CacheStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    return Ok(self.entries.get(key));
  }

  async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
    self.entries.insert(key.to_string(), entry);
    self.keys.lock().insert(key.to_string());
    return Ok(());
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self.entries.invalidate(key);
    self.keys.lock().remove(key);
    return Ok(());
  }

  async fn delete_pattern(&self, table_prefix: &str) -> Result<()> {
    let matching: Vec<String> = self
      .keys
      .lock()
      .iter()
      .filter(|k| k.starts_with(table_prefix))
      .cloned()
      .collect();
    for key in matching {
      self.entries.invalidate(&key);
      self.keys.lock().remove(&key);
    }
    return Ok(());
  }

  async fn clear(&self) -> Result<()> {
    self.entries.invalidate_all();
    self.keys.lock().clear();
    return Ok(());
  }
}

/// One file per key under `cache.path`, keyed by a filesystem-safe encoding
/// of the key itself (which already carries the table name as a literal
/// prefix) so `delete_pattern` is a directory listing filtered by filename
/// prefix, not a read of every entry's payload.
pub struct FileStore {
  dir: PathBuf,
}

impl FileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    return Self { dir: dir.into() };
  }

  fn encode(key: &str) -> String {
    return key.replace([':', '/'], "_");
  }

  fn path_for(&self, key: &str) -> PathBuf {
    return self.dir.join(format!("{}.cache", Self::encode(key)));
  }
}

#[async_trait]
impl CacheStore for FileStore {
  async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let path = self.path_for(key);
    let bytes = match tokio::fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(GatewayError::Internal(anyhow::anyhow!("cache read: {e}"))),
    };
    let record: FileRecord = serde_json::from_slice(&bytes)
      .map_err(|e| GatewayError::Internal(anyhow::anyhow!("cache decode: {e}")))?;
    return Ok(Some(CacheEntry {
      payload: record.payload,
      stored_at: record.stored_at,
      ttl: record.ttl,
    }));
  }

  async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
    tokio::fs::create_dir_all(&self.dir)
      .await
      .map_err(|e| GatewayError::Internal(anyhow::anyhow!("cache dir: {e}")))?;
    let record = FileRecord {
      payload: entry.payload,
      stored_at: entry.stored_at,
      ttl: entry.ttl,
    };
    let serialized = serde_json::to_vec(&record)
      .map_err(|e| GatewayError::Internal(anyhow::anyhow!("cache encode: {e}")))?;
    tokio::fs::write(self.path_for(key), serialized)
      .await
      .map_err(|e| GatewayError::Internal(anyhow::anyhow!("cache write: {e}")))?;
    return Ok(());
  }

  async fn delete(&self, key: &str) -> Result<()> {
    match tokio::fs::remove_file(self.path_for(key)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(GatewayError::Internal(anyhow::anyhow!("cache delete: {e}"))),
    }
  }

  async fn delete_pattern(&self, table_prefix: &str) -> Result<()> {
    let prefix = Self::encode(table_prefix);
    let mut dir = match tokio::fs::read_dir(&self.dir).await {
      Ok(dir) => dir,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
      Err(e) => return Err(GatewayError::Internal(anyhow::anyhow!("cache scan: {e}"))),
    };
    while let Some(entry) = dir
      .next_entry()
      .await
      .map_err(|e| GatewayError::Internal(anyhow::anyhow!("cache scan: {e}")))?
    {
      if entry.file_name().to_string_lossy().starts_with(&prefix) {
        tokio::fs::remove_file(entry.path()).await.ok();
      }
    }
    return Ok(());
  }

  async fn clear(&self) -> Result<()> {
    match tokio::fs::remove_dir_all(&self.dir).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(GatewayError::Internal(anyhow::anyhow!("cache clear: {e}"))),
    }
  }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct FileRecord {
  payload: Vec<u8>,
  stored_at: i64,
  ttl: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn memory_store_round_trips_and_invalidates_by_table() {
    let store = MemoryStore::default();
    store
      .set("users:abc", CacheEntry { payload: b"1".to_vec(), stored_at: 0, ttl: 300 })
      .await
      .unwrap();
    store
      .set("users:def", CacheEntry { payload: b"2".to_vec(), stored_at: 0, ttl: 300 })
      .await
      .unwrap();
    store
      .set("products:xyz", CacheEntry { payload: b"3".to_vec(), stored_at: 0, ttl: 300 })
      .await
      .unwrap();

    assert!(store.get("users:abc").await.unwrap().is_some());

    store.delete_pattern("users:").await.unwrap();

    assert!(store.get("users:abc").await.unwrap().is_none());
    assert!(store.get("users:def").await.unwrap().is_none());
    assert!(store.get("products:xyz").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn file_store_round_trips_and_invalidates_by_table() {
    let dir = std::env::temp_dir().join(format!("gateway-cache-test-{}", uuid::Uuid::new_v4()));
    let store = FileStore::new(&dir);

    store
      .set("users:abc", CacheEntry { payload: b"hello".to_vec(), stored_at: 0, ttl: 300 })
      .await
      .unwrap();
    let got = store.get("users:abc").await.unwrap().unwrap();
    assert_eq!(got.payload, b"hello");

    store.delete_pattern("users:").await.unwrap();
    assert!(store.get("users:abc").await.unwrap().is_none());

    tokio::fs::remove_dir_all(&dir).await.ok();
  }
}
