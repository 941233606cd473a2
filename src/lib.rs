//! Cachewise - Read-Through Caching Engine
//!
//! Wraps expensive producers (queries, remote calls, computations) with a
//! cache: deterministic key derivation, tag-based invalidation, TTL expiry
//! over a pluggable store, and latency/hit-ratio statistics rolled up into
//! hourly and daily buckets.
//!
//! # Architecture
//!
//! ```text
//! caller ──► CacheEngine ──► KeyManager / TagResolver
//!                │
//!                ├──► CacheStore (in-memory, LZ4-compressed, ...)
//!                └──► StatisticsEngine ──► RollupTask ──► StatsRepository
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cachewise::{CacheConfig, CacheEngine, CacheOptions};
//! use serde_json::{json, Value};
//!
//! # async fn demo() -> cachewise::Result<()> {
//! let engine = Arc::new(CacheEngine::in_memory(CacheConfig::new("users")));
//! let load_user = engine.wrap(
//!     "user:{args[0]}",
//!     |args: Vec<Value>| async move { Ok::<_, cachewise::Error>(json!({"id": args[0]})) },
//!     CacheOptions::new(),
//! );
//!
//! let outcome: cachewise::CacheOutcome = load_user.call(&[json!(42)]).await?;
//! assert_eq!(outcome.key.as_deref(), Some("user:42"));
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Key and tag resolution, the engine and its read-through surface
//! - [`stats`] - Statistics window, percentiles, rollup and persistence
//! - [`store`] - Store contract and backends
//! - [`error`] - Error types

pub mod cache;
pub mod error;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use cache::{
    CacheAnnotation, CacheConfig, CacheEngine, CacheEntry, CacheOptions, CacheOutcome,
    CallContext, KeyManager, KeySubject, KeyTemplate, SetOptions, TagConfig, TagResolver,
    Wrapped, CACHE_KEY_HEADER,
};
pub use error::{Error, Result};
pub use stats::{
    AggregateRecord, CacheStatistics, InMemoryStatsRepository, Period, RollupTask,
    StatisticsConfig, StatisticsEngine, StatsRepository,
};
pub use store::{CacheStore, CompressedStore, InMemoryStore, StoreStats};
