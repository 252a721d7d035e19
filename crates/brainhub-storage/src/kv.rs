//! TTL key-value store with a single consolidated expiry alarm.
//!
//! Payloads are stored as `{"value": V, "expiresAt": T | null}` JSON strings.
//! Expiry is enforced lazily on `get`/`ttl` and eagerly by one sweeper task
//! that sleeps until the earliest scheduled deadline, deletes everything
//! expired, then reschedules to the earliest remaining deadline.
//!
//! # Alarm invariant
//!
//! The alarm is a monotone minimum: [`KvStore::schedule_expiry`] may only
//! lower the active deadline, and after a sweep the deadline equals the
//! minimum `expiresAt` of the surviving entries (or none). The sweeper holds
//! the alarm lock for the whole sweep so a concurrent `put` with a shorter
//! TTL cannot have its deadline overwritten by the sweep's recomputation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::backing::KvBacking;
use crate::error::{StorageError, StorageResult};

/// Maximum number of keys returned by [`KvStore::list`].
pub const LIST_LIMIT: usize = 1000;

/// Stored payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    value: Value,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Result of a [`KvStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct GetOutcome {
    /// The stored value, if present and unexpired.
    pub value: Option<Value>,
    /// True when the entry existed but had passed its deadline; the entry
    /// has been deleted as a side effect.
    pub expired: bool,
}

/// Result of a [`KvStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Stored keys, bounded at [`LIST_LIMIT`].
    pub keys: Vec<String>,
    /// Number of keys returned.
    pub count: usize,
    /// Total number of entries in the backing store.
    pub size: usize,
}

/// TTL key-value store.
pub struct KvStore {
    backing: Arc<dyn KvBacking>,
    /// Currently scheduled alarm deadline. Also guards sweeps: the sweeper
    /// holds this lock for the duration of a sweep.
    alarm: Mutex<Option<i64>>,
    wake: Notify,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl KvStore {
    /// Start a store over the given backing and spawn its sweeper task.
    ///
    /// A deadline persisted in the backing's alarm slot by a previous run is
    /// adopted, so entries that expired while the process was down are swept
    /// promptly.
    pub async fn start(backing: Arc<dyn KvBacking>) -> Arc<Self> {
        let persisted = backing.alarm().await.unwrap_or_default();
        let store = Arc::new(Self {
            backing,
            alarm: Mutex::new(persisted),
            wake: Notify::new(),
            sweeper: Mutex::new(None),
        });
        let handle = tokio::spawn(run_sweeper(Arc::clone(&store)));
        *store.sweeper.lock().await = Some(handle);
        store
    }

    /// Stop the sweeper task.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }
    }

    /// Store a value, optionally expiring after `ttl_seconds`.
    pub async fn put(
        &self,
        key: &str,
        value: Value,
        ttl_seconds: Option<u64>,
    ) -> StorageResult<()> {
        let expires_at = ttl_seconds.map(|secs| now_ms() + (secs as i64) * 1000);
        let payload = serde_json::to_string(&StoredEntry { value, expires_at })
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.backing.put(key, payload).await?;
        if let Some(deadline) = expires_at {
            self.schedule_expiry(deadline).await?;
        }
        Ok(())
    }

    /// Fetch a value, deleting it first if its deadline has passed.
    pub async fn get(&self, key: &str) -> StorageResult<GetOutcome> {
        let Some(payload) = self.backing.get(key).await? else {
            return Ok(GetOutcome {
                value: None,
                expired: false,
            });
        };
        let entry: StoredEntry = serde_json::from_str(&payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if entry.expires_at.is_some_and(|at| at <= now_ms()) {
            self.backing.delete(key).await?;
            trace!(key, "Lazy-expired entry on get");
            return Ok(GetOutcome {
                value: None,
                expired: true,
            });
        }
        Ok(GetOutcome {
            value: Some(entry.value),
            expired: false,
        })
    }

    /// Remove a key. Idempotent; returns whether it existed.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.backing.delete(key).await
    }

    /// Enumerate stored keys (bounded) plus the backing-store size.
    pub async fn list(&self) -> StorageResult<Listing> {
        let size = self.backing.len().await?;
        let keys: Vec<String> = self
            .backing
            .list()
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .take(LIST_LIMIT)
            .collect();
        let count = keys.len();
        Ok(Listing { keys, count, size })
    }

    /// Set or replace a key's deadline to `now + seconds`.
    ///
    /// Returns `false` when the key does not exist.
    pub async fn expire(&self, key: &str, seconds: u64) -> StorageResult<bool> {
        let Some(payload) = self.backing.get(key).await? else {
            return Ok(false);
        };
        let mut entry: StoredEntry = serde_json::from_str(&payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let deadline = now_ms() + (seconds as i64) * 1000;
        entry.expires_at = Some(deadline);
        let payload = serde_json::to_string(&entry)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.backing.put(key, payload).await?;
        self.schedule_expiry(deadline).await?;
        Ok(true)
    }

    /// Remaining lifetime of a key.
    ///
    /// `-2` when absent (or lazily expired by this call), `-1` when the key
    /// has no deadline, otherwise the remaining seconds rounded up.
    pub async fn ttl(&self, key: &str) -> StorageResult<i64> {
        let Some(payload) = self.backing.get(key).await? else {
            return Ok(-2);
        };
        let entry: StoredEntry = serde_json::from_str(&payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        match entry.expires_at {
            None => Ok(-1),
            Some(at) => {
                let now = now_ms();
                if at <= now {
                    self.backing.delete(key).await?;
                    return Ok(-2);
                }
                Ok((at - now + 999) / 1000)
            },
        }
    }

    /// Lower the alarm to `deadline_ms` if it is earlier than the current
    /// deadline. Raising is not possible; only a sweep reschedules upward.
    pub async fn schedule_expiry(&self, deadline_ms: i64) -> StorageResult<()> {
        let mut alarm = self.alarm.lock().await;
        if alarm.is_some_and(|current| current <= deadline_ms) {
            return Ok(());
        }
        *alarm = Some(deadline_ms);
        self.backing.set_alarm(Some(deadline_ms)).await?;
        drop(alarm);
        self.wake.notify_one();
        debug!(deadline_ms, "Alarm lowered");
        Ok(())
    }

    /// Currently scheduled alarm deadline, if any.
    pub async fn alarm_deadline(&self) -> Option<i64> {
        *self.alarm.lock().await
    }

    /// Delete every expired entry and reschedule to the earliest remaining
    /// deadline. Malformed payloads are skipped, never deleted.
    async fn sweep(&self) {
        let mut alarm = self.alarm.lock().await;
        let entries = match self.backing.list().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Sweep could not enumerate entries");
                return;
            },
        };
        let now = now_ms();
        let mut next: Option<i64> = None;
        let mut removed = 0usize;
        for (key, payload) in entries {
            let Ok(entry) = serde_json::from_str::<StoredEntry>(&payload) else {
                continue;
            };
            match entry.expires_at {
                Some(at) if at <= now => {
                    if let Err(e) = self.backing.delete(&key).await {
                        warn!(%key, error = %e, "Sweep failed to delete expired entry");
                    } else {
                        removed += 1;
                    }
                },
                Some(at) => next = Some(next.map_or(at, |n| n.min(at))),
                None => {},
            }
        }
        *alarm = next;
        if let Err(e) = self.backing.set_alarm(next).await {
            warn!(error = %e, "Sweep failed to persist alarm slot");
        }
        debug!(removed, next = ?next, "Sweep finished");
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").finish_non_exhaustive()
    }
}

/// Sweeper loop: sleep until the scheduled deadline (or until woken by a
/// lowered alarm), then sweep.
async fn run_sweeper(store: Arc<KvStore>) {
    loop {
        let deadline = *store.alarm.lock().await;
        match deadline {
            None => store.wake.notified().await,
            Some(at) => {
                let now = now_ms();
                if at <= now {
                    store.sweep().await;
                    continue;
                }
                let sleep = std::time::Duration::from_millis((at - now) as u64);
                tokio::select! {
                    () = store.wake.notified() => {},
                    () = tokio::time::sleep(sleep) => store.sweep().await,
                }
            },
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemoryBacking;
    use serde_json::json;
    use std::time::Duration;

    async fn store_with_backing() -> (Arc<KvStore>, Arc<MemoryBacking>) {
        let backing = Arc::new(MemoryBacking::new());
        let store = KvStore::start(Arc::clone(&backing) as Arc<dyn KvBacking>).await;
        (store, backing)
    }

    #[tokio::test]
    async fn put_then_get_returns_value() {
        let (store, _) = store_with_backing().await;
        store.put("foo", json!("bar"), None).await.unwrap();
        let got = store.get("foo").await.unwrap();
        assert_eq!(got.value, Some(json!("bar")));
        assert!(!got.expired);
    }

    #[tokio::test]
    async fn last_put_wins() {
        let (store, _) = store_with_backing().await;
        store.put("k", json!(1), None).await.unwrap();
        store.put("k", json!(2), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().value, Some(json!(2)));
    }

    #[tokio::test]
    async fn stored_payload_shape() {
        let (store, backing) = store_with_backing().await;
        store.put("k", json!({"a": 1}), None).await.unwrap();
        let raw = backing.get("k").await.unwrap().unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["value"]["a"], 1);
        assert_eq!(parsed["expiresAt"], Value::Null);
    }

    #[tokio::test]
    async fn get_lazily_expires_past_deadline() {
        let (store, backing) = store_with_backing().await;
        // Inject an already-expired entry directly.
        backing
            .put("old", r#"{"value":"v","expiresAt":1}"#.into())
            .await
            .unwrap();
        let got = store.get("old").await.unwrap();
        assert_eq!(got.value, None);
        assert!(got.expired);
        assert_eq!(backing.get("old").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_missing_is_not_expired() {
        let (store, _) = store_with_backing().await;
        let got = store.get("nope").await.unwrap();
        assert_eq!(got.value, None);
        assert!(!got.expired);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, _) = store_with_backing().await;
        store.put("k", json!(true), None).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn ttl_codes() {
        let (store, backing) = store_with_backing().await;
        assert_eq!(store.ttl("absent").await.unwrap(), -2);

        store.put("forever", json!(1), None).await.unwrap();
        assert_eq!(store.ttl("forever").await.unwrap(), -1);

        store.put("soon", json!(1), Some(10)).await.unwrap();
        let remaining = store.ttl("soon").await.unwrap();
        assert!((9..=10).contains(&remaining), "remaining = {remaining}");

        // An expired entry reads as absent and is removed.
        backing
            .put("gone", r#"{"value":1,"expiresAt":1}"#.into())
            .await
            .unwrap();
        assert_eq!(store.ttl("gone").await.unwrap(), -2);
        assert_eq!(backing.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_missing_key_reports_not_found() {
        let (store, _) = store_with_backing().await;
        assert!(!store.expire("absent", 5).await.unwrap());
    }

    #[tokio::test]
    async fn expire_updates_deadline() {
        let (store, _) = store_with_backing().await;
        store.put("k", json!(1), None).await.unwrap();
        assert!(store.expire("k", 10).await.unwrap());
        let remaining = store.ttl("k").await.unwrap();
        assert!((9..=10).contains(&remaining));
    }

    #[tokio::test]
    async fn alarm_is_monotone_minimum() {
        let (store, backing) = store_with_backing().await;
        let base = now_ms() + 1_000_000;
        store.schedule_expiry(base + 5_000).await.unwrap();
        store.schedule_expiry(base + 1_000).await.unwrap();
        // Raising is ignored.
        store.schedule_expiry(base + 9_000).await.unwrap();
        assert_eq!(store.alarm_deadline().await, Some(base + 1_000));
        assert_eq!(backing.alarm().await.unwrap(), Some(base + 1_000));
    }

    #[tokio::test]
    async fn sweep_deletes_expired_and_reschedules() {
        let (store, backing) = store_with_backing().await;
        let now = now_ms();
        let far = now + 60_000;
        backing
            .put("dead", format!(r#"{{"value":1,"expiresAt":{}}}"#, now + 20))
            .await
            .unwrap();
        backing
            .put("alive", format!(r#"{{"value":2,"expiresAt":{far}}}"#))
            .await
            .unwrap();
        backing
            .put("broken", "not json".into())
            .await
            .unwrap();
        store.schedule_expiry(now + 20).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(backing.get("dead").await.unwrap(), None);
        assert!(backing.get("alive").await.unwrap().is_some());
        // Malformed payloads survive the sweep untouched.
        assert_eq!(backing.get("broken").await.unwrap().as_deref(), Some("not json"));
        assert_eq!(store.alarm_deadline().await, Some(far));
    }

    #[tokio::test]
    async fn sweep_clears_alarm_when_nothing_remains() {
        let (store, backing) = store_with_backing().await;
        let now = now_ms();
        backing
            .put("dead", format!(r#"{{"value":1,"expiresAt":{}}}"#, now + 20))
            .await
            .unwrap();
        store.schedule_expiry(now + 20).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(store.alarm_deadline().await, None);
        assert_eq!(backing.alarm().await.unwrap(), None);
    }

    #[tokio::test]
    async fn persisted_alarm_is_adopted_on_start() {
        let backing = Arc::new(MemoryBacking::new());
        let now = now_ms();
        backing
            .put("stale", format!(r#"{{"value":1,"expiresAt":{}}}"#, now - 50))
            .await
            .unwrap();
        backing.set_alarm(Some(now - 50)).await.unwrap();

        let store = KvStore::start(Arc::clone(&backing) as Arc<dyn KvBacking>).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(backing.get("stale").await.unwrap(), None);
        assert_eq!(store.alarm_deadline().await, None);
    }

    #[tokio::test]
    async fn list_is_bounded() {
        let (store, _) = store_with_backing().await;
        for i in 0..1005 {
            store.put(&format!("k{i:04}"), json!(i), None).await.unwrap();
        }
        let listing = store.list().await.unwrap();
        assert_eq!(listing.count, LIST_LIMIT);
        assert_eq!(listing.keys.len(), LIST_LIMIT);
        assert_eq!(listing.size, 1005);
    }

    #[tokio::test]
    async fn list_reports_keys_and_size() {
        let (store, _) = store_with_backing().await;
        store.put("a", json!(1), None).await.unwrap();
        store.put("b", json!(2), None).await.unwrap();
        let listing = store.list().await.unwrap();
        assert_eq!(listing.keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(listing.count, 2);
        assert_eq!(listing.size, 2);
    }
}
