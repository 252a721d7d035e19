//! Backing store for the KV layer.
//!
//! The hub persists `(key, jsonPayload)` pairs plus one single-slot alarm
//! deadline. Everything else (payload shape, expiry, sweeping) lives in
//! [`crate::kv::KvStore`]; a backing only needs to store and enumerate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageResult;

/// Raw storage for the KV layer.
///
/// Implementations must serialize concurrent mutation internally. Keys are
/// opaque strings; payloads are opaque JSON strings owned by the KV layer.
#[async_trait]
pub trait KvBacking: Send + Sync {
    /// Fetch one payload.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store one payload, replacing any previous value.
    async fn put(&self, key: &str, payload: String) -> StorageResult<()>;

    /// Remove one entry. Returns whether the key existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Enumerate every `(key, payload)` pair, key order.
    async fn list(&self) -> StorageResult<Vec<(String, String)>>;

    /// Number of stored entries.
    async fn len(&self) -> StorageResult<usize>;

    /// Persist the single-slot alarm deadline (epoch milliseconds).
    async fn set_alarm(&self, deadline_ms: Option<i64>) -> StorageResult<()>;

    /// Read the persisted alarm deadline.
    async fn alarm(&self) -> StorageResult<Option<i64>>;
}

/// In-memory backing store.
#[derive(Debug, Default)]
pub struct MemoryBacking {
    entries: RwLock<BTreeMap<String, String>>,
    alarm: RwLock<Option<i64>>,
}

impl MemoryBacking {
    /// Create an empty backing store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBacking for MemoryBacking {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, payload: String) -> StorageResult<()> {
        self.entries.write().await.insert(key.to_string(), payload);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn list(&self) -> StorageResult<Vec<(String, String)>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn len(&self) -> StorageResult<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn set_alarm(&self, deadline_ms: Option<i64>) -> StorageResult<()> {
        *self.alarm.write().await = deadline_ms;
        Ok(())
    }

    async fn alarm(&self) -> StorageResult<Option<i64>> {
        Ok(*self.alarm.read().await)
    }
}
