//! Cache Entry Types
//!
//! The stored envelope and the result of a read-through call.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Response header / metadata field carrying the resolved cache key
pub const CACHE_KEY_HEADER: &str = "x-cache-key";

/// Value as held by the store: payload plus tags and write time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Epoch milliseconds of the write
    pub timestamp: i64,
}

impl CacheEntry {
    /// Wrap a value, stamping the current time
    pub fn new(value: Value, tags: Vec<String>) -> Self {
        Self {
            value,
            tags,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Check tag membership
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Serialize for the store
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Deserialize from the store
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Age of the entry relative to now
    pub fn age(&self) -> Duration {
        let now = chrono::Utc::now().timestamp_millis();
        Duration::from_millis(now.saturating_sub(self.timestamp).max(0) as u64)
    }
}

/// Result of a read-through call
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOutcome<T = Value> {
    pub result: T,
    /// `None` when the call bypassed the cache
    pub key: Option<String>,
    pub hit: bool,
    /// Lookup time on a hit, lookup plus producer time on a miss
    pub latency: Duration,
}

impl<T> CacheOutcome<T> {
    /// Observability header for the resolved key
    pub fn header(&self) -> Option<(&'static str, &str)> {
        self.key.as_deref().map(|k| (CACHE_KEY_HEADER, k))
    }

    /// Discard metadata
    pub fn into_result(self) -> T {
        self.result
    }
}

// =============================================================================
// Tests
// =============================================================================
