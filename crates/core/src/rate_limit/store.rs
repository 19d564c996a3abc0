use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::Mutex;

use super::{CheckOutcome, RateLimitStore, Sequences, slide_and_decide};
use crate::error::{GatewayError, Result};

/// In-process reference store (Design Notes §9): a single mutex guards the
/// whole map, so the drop/compare/append sequence for one identifier is
/// trivially atomic with respect to every other caller. Fine for
/// single-node deployments and tests; per §4.6 callers must not assume this
/// locality holds across processes.
#[derive(Default)]
pub struct MemoryStore {
  sequences: Mutex<Sequences>,
}

impl MemoryStore {
  pub fn new() -> Self {
    return Self::default();
  }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
  async fn record(
    &self,
    identifier: &str,
    now: i64,
    window_seconds: u64,
    max_requests: u32,
  ) -> Result<CheckOutcome> {
    let mut sequences = self.sequences.lock();
    let sequence = sequences.entry(identifier.to_string()).or_default();
    return Ok(slide_and_decide(sequence, now, window_seconds, max_requests));
  }
}

/// One JSON file per identifier under `storage_dir`, guarded by an OS-level
/// advisory lock (`fs2`, grounded on its use for file coordination in the
/// SpacetimeDB reference example -- this crate's pack has no lock-file
/// precedent of its own) held for the whole read-modify-write so torn
/// counts can't occur across processes sharing a filesystem. Per Design
/// Notes §9 this is a single-node mechanism; multi-node deployments must
/// substitute a store built on a real atomic primitive (e.g. Redis
/// `INCR`+`EXPIRE`).
pub struct FileStore {
  dir: PathBuf,
}

impl FileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    return Self { dir: dir.into() };
  }

  fn path_for(&self, identifier: &str) -> PathBuf {
    let safe_name = identifier.replace(['/', ':'], "_");
    return self.dir.join(format!("{safe_name}.json"));
  }
}

#[async_trait]
impl RateLimitStore for FileStore {
  async fn record(
    &self,
    identifier: &str,
    now: i64,
    window_seconds: u64,
    max_requests: u32,
  ) -> Result<CheckOutcome> {
    let path = self.path_for(identifier);
    let dir = self.dir.clone();

    return tokio::task::spawn_blocking(move || -> Result<CheckOutcome> {
      std::fs::create_dir_all(&dir)
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("rate limit dir: {e}")))?;

      let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("rate limit file: {e}")))?;

      file
        .lock_exclusive()
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("rate limit lock: {e}")))?;

      let mut contents = String::new();
      file
        .read_to_string(&mut contents)
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("rate limit read: {e}")))?;

      let mut sequence: Vec<i64> = if contents.trim().is_empty() {
        vec![]
      } else {
        serde_json::from_str(&contents).unwrap_or_default()
      };

      let outcome = slide_and_decide(&mut sequence, now, window_seconds, max_requests);

      let serialized = serde_json::to_string(&sequence)
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("rate limit encode: {e}")))?;

      file
        .set_len(0)
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("rate limit truncate: {e}")))?;
      file
        .seek(SeekFrom::Start(0))
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("rate limit seek: {e}")))?;
      file
        .write_all(serialized.as_bytes())
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("rate limit write: {e}")))?;

      FileExt::unlock(&file).ok();
      return Ok(outcome);
    })
    .await
    .map_err(|e| GatewayError::Internal(anyhow::anyhow!("rate limit task join: {e}")))?;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn memory_store_enforces_the_limit_per_identifier() {
    let store = MemoryStore::new();
    for _ in 0..2 {
      let outcome = store.record("ip:1.2.3.4", 1000, 60, 2).await.unwrap();
      assert!(outcome.allowed);
    }
    let outcome = store.record("ip:1.2.3.4", 1000, 60, 2).await.unwrap();
    assert!(!outcome.allowed);

    // A different identifier has its own independent bucket.
    let outcome = store.record("ip:5.6.7.8", 1000, 60, 2).await.unwrap();
    assert!(outcome.allowed);
  }

  #[tokio::test]
  async fn file_store_persists_across_instances() {
    let dir = std::env::temp_dir().join(format!("gateway-ratelimit-test-{}", uuid::Uuid::new_v4()));
    let store = FileStore::new(&dir);
    for _ in 0..2 {
      let outcome = store.record("user:alice", 1000, 60, 2).await.unwrap();
      assert!(outcome.allowed);
    }

    // A fresh store instance pointed at the same directory sees the
    // persisted count and denies the third request.
    let store2 = FileStore::new(&dir);
    let outcome = store2.record("user:alice", 1000, 60, 2).await.unwrap();
    assert!(!outcome.allowed);

    std::fs::remove_dir_all(&dir).ok();
  }
}
