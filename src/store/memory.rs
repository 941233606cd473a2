//! In-memory store
//!
//! Uses DashMap for sharded concurrent access. Expiry is checked lazily on
//! every read and swept during iteration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{effective_ttl, CacheStore, StoreStats};
use crate::error::Result;

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory store for embedding and tests
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_entry(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, old)) => {
                self.total_bytes
                    .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        expired.iter().filter(|k| self.remove_entry(k)).count()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let found = self.entries.get(key).map(|e| e.value().clone());
        match found {
            Some(v) if v.is_expired(Instant::now()) => {
                self.remove_entry(key);
                Ok(None)
            }
            Some(v) => Ok(Some(v.data)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);

        let size = value.len() as u64;
        let stored = StoredValue {
            data: value,
            expires_at: effective_ttl(ttl).map(|d| Instant::now() + d),
        };

        if let Some(old) = self.entries.insert(key.to_string(), stored) {
            self.total_bytes
                .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size, Ordering::Relaxed);

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.remove_entry(key))
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn iterate(&self) -> Result<Vec<(String, Bytes)>> {
        self.purge_expired();
        Ok(self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().data.clone()))
            .collect())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            item_count: self.entries.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = InMemoryStore::new();

        store
            .set("key", Bytes::from_static(b"data"), None)
            .await
            .unwrap();

        let result = store.get("key").await.unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"data")));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryStore::new();
        store
            .set("key", Bytes::from_static(b"data"), None)
            .await
            .unwrap();

        assert!(store.delete("key").await.unwrap());
        assert!(!store.delete("key").await.unwrap());
        assert!(store.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let store = InMemoryStore::new();
        store
            .set("forever", Bytes::from_static(b"v"), Some(Duration::ZERO))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.has("forever").await.unwrap());
    }

    #[tokio::test]
    async fn test_short_ttl_expires() {
        let store = InMemoryStore::new();
        store
            .set("brief", Bytes::from_static(b"v"), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(store.has("brief").await.unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!store.has("brief").await.unwrap());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_iterate_skips_expired() {
        let store = InMemoryStore::new();
        store
            .set("live", Bytes::from_static(b"1"), None)
            .await
            .unwrap();
        store
            .set("dead", Bytes::from_static(b"2"), Some(Duration::from_millis(5)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = store.iterate().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "live");
    }

    #[tokio::test]
    async fn test_stats_track_bytes_on_overwrite() {
        let store = InMemoryStore::new();
        store
            .set("k", Bytes::from_static(b"12345"), None)
            .await
            .unwrap();
        store
            .set("k", Bytes::from_static(b"12"), None)
            .await
            .unwrap();
        store
            .set("j", Bytes::from_static(b"123"), None)
            .await
            .unwrap();
        store.get("k").await.unwrap();
        store.delete("j").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.item_count, 1);
        assert_eq!(stats.total_bytes, 2);
        assert_eq!(stats.writes, 3);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.deletes, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryStore::new();
        store.set("a", Bytes::from_static(b"1"), None).await.unwrap();
        store.set("b", Bytes::from_static(b"2"), None).await.unwrap();

        store.clear().await.unwrap();

        assert!(store.is_empty());
        assert_eq!(store.stats().total_bytes, 0);
    }
}
