//! Cache Store Contract
//!
//! Uniform key-value contract over a pluggable backend. The engine only ever
//! talks to a store through [`CacheStore`]; values cross this boundary as
//! opaque bytes (serialized [`CacheEntry`](crate::cache::CacheEntry) JSON).
//!
//! # Backends
//!
//! - [`InMemoryStore`] - sharded `DashMap` with lazily enforced TTLs
//! - [`CompressedStore`] - LZ4 wrapper around any other store
//!
//! Remote or on-disk backends implement the same trait.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub mod compression;
mod memory;

pub use compression::{
    CompressedStore, CompressionAlgorithm, CompressionConfig, CompressionManager, Compressor,
};
pub use memory::InMemoryStore;

/// Key-value store consumed by the cache engine
///
/// Implementations must be safe to share across tasks. `iterate` returns a
/// finite snapshot; entries written while a caller walks it may or may not
/// be part of it.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a value. `ttl` of `None` or zero means no expiry.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Delete a value, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;

    /// Snapshot of all live entries
    async fn iterate(&self) -> Result<Vec<(String, Bytes)>>;

    /// Check if a live entry exists
    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Point-in-time gauges for statistics rollup
    fn stats(&self) -> StoreStats;
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries currently held (may include not-yet-swept expired entries)
    pub item_count: u64,
    /// Total payload bytes held
    pub total_bytes: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

/// Normalize a TTL: zero means "no expiry"
pub(crate) fn effective_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        assert_eq!(effective_ttl(Some(Duration::ZERO)), None);
        assert_eq!(effective_ttl(None), None);
        assert_eq!(
            effective_ttl(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
    }
}
