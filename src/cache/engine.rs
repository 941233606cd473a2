//! Cache Engine
//!
//! Ties a [`CacheStore`], the key and tag resolvers and a
//! [`StatisticsEngine`] together. Direct operations live here; the
//! read-through surface (`wrap`, `exec`, `run`) is in
//! [`read_through`](super::read_through).
//!
//! Store and serialization failures never escape unless
//! [`CacheConfig::throw_on_error`] is set: they are logged, counted as
//! errors, and the operation degrades to a miss or no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::entry::CacheEntry;
use super::key::KeyManager;
use super::options::SetOptions;
use super::tags::TagResolver;
use crate::error::{Error, Result};
use crate::stats::{
    Gauges, RollupTask, RuntimeConfiguration, StatisticsConfig, StatisticsEngine,
};
use crate::store::{CacheStore, InMemoryStore};

// =============================================================================
// Configuration
// =============================================================================

/// Cache engine configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache name, also the statistics scope
    pub name: String,
    /// TTL used when a call does not set one; `None` means no expiry
    pub default_ttl: Option<Duration>,
    /// Surface store errors instead of degrading to a miss
    pub throw_on_error: bool,
    /// When false every call goes straight to the producer
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            default_ttl: None,
            throw_on_error: false,
            enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = throw;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Effective engine settings, including runtime toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfiguration {
    pub name: String,
    pub enabled: bool,
    pub throw_on_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_ttl_ms: Option<u64>,
    pub statistics: RuntimeConfiguration,
}

// =============================================================================
// Engine
// =============================================================================

/// Read-through cache over a pluggable store
pub struct CacheEngine {
    pub(crate) config: CacheConfig,
    enabled: AtomicBool,
    pub(crate) store: Arc<dyn CacheStore>,
    pub(crate) stats: Arc<StatisticsEngine>,
    pub(crate) keys: KeyManager,
    pub(crate) tags: TagResolver,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.config)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl CacheEngine {
    /// Create an engine over `store`, recording into `stats`
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        stats: Arc<StatisticsEngine>,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            store,
            stats,
            keys: KeyManager::new(),
            tags: TagResolver::new(),
        }
    }

    /// Create an engine with in-memory statistics persistence
    pub fn with_store(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        stats_config: StatisticsConfig,
    ) -> Self {
        let stats = Arc::new(StatisticsEngine::in_memory(config.name.clone(), stats_config));
        Self::new(config, store, stats)
    }

    /// Create an engine over an [`InMemoryStore`] (for testing)
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::with_store(
            config,
            Arc::new(InMemoryStore::new()),
            StatisticsConfig::default(),
        )
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn statistics(&self) -> &Arc<StatisticsEngine> {
        &self.stats
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    pub fn tag_resolver(&self) -> &TagResolver {
        &self.tags
    }

    // =========================================================================
    // Runtime toggles
    // =========================================================================

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!(cache = %self.config.name, enabled, "Cache toggled");
    }

    pub fn set_statistics_enabled(&self, enabled: bool) {
        self.stats.set_enabled(enabled);
    }

    pub fn set_key_tracking_enabled(&self, enabled: bool) {
        self.stats.set_key_tracking_enabled(enabled);
    }

    pub fn runtime_configuration(&self) -> EngineConfiguration {
        EngineConfiguration {
            name: self.config.name.clone(),
            enabled: self.is_enabled(),
            throw_on_error: self.config.throw_on_error,
            default_ttl_ms: self.config.default_ttl.map(|d| d.as_millis() as u64),
            statistics: self.stats.runtime_configuration(),
        }
    }

    // =========================================================================
    // Direct operations
    // =========================================================================

    /// Get a value, recording a hit or a miss
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let start = Instant::now();
        match self.read_entry(key).await {
            Ok(Some(entry)) => {
                self.stats.record_hit(start.elapsed(), Some(key), None);
                Ok(Some(entry.value))
            }
            Ok(None) => {
                self.stats.record_miss(start.elapsed(), Some(key), None);
                Ok(None)
            }
            Err(e) => self.degrade(e, key, start).map(|_| None),
        }
    }

    /// Typed [`get`](Self::get)
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Store a value with resolved tags and TTL
    pub async fn set(&self, key: &str, value: Value, options: SetOptions) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let start = Instant::now();
        let tags = self.tags.resolve_tags(
            &options.tags,
            &value,
            options.params.as_ref(),
            &options.context,
        );
        let ttl = options.ttl.or(self.config.default_ttl);

        match self.write_entry(key, value, tags, ttl).await {
            Ok(()) => {
                self.stats.record_set(start.elapsed(), Some(key), None);
                Ok(())
            }
            Err(e) => self.degrade(e, key, start),
        }
    }

    /// Typed [`set`](Self::set)
    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T, options: SetOptions) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value, options).await
    }

    /// Check for a live entry without touching statistics
    pub async fn has(&self, key: &str) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }

        let start = Instant::now();
        match self.store.has(key).await {
            Ok(found) => Ok(found),
            Err(e) => self.degrade(e, key, start).map(|_| false),
        }
    }

    /// Delete an entry, returning whether it existed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }

        let start = Instant::now();
        match self.store.delete(key).await {
            Ok(existed) => {
                self.stats.record_delete(start.elapsed(), Some(key), None);
                Ok(existed)
            }
            Err(e) => self.degrade(e, key, start).map(|_| false),
        }
    }

    /// Clear the store and every statistic of this cache, live and persisted
    #[instrument(skip(self), fields(cache = %self.config.name))]
    pub async fn clear(&self) -> Result<()> {
        let start = Instant::now();
        if let Err(e) = self.store.clear().await {
            self.degrade(e, "*", start)?;
        }
        self.stats.reset_all().await?;
        info!("Cache cleared");
        Ok(())
    }

    /// Delete every entry carrying `tag`; returns the number removed
    pub async fn delete_by_tag(&self, tag: &str) -> Result<usize> {
        self.delete_by_tags(&[tag]).await
    }

    /// Delete every entry carrying any of `tags`
    #[instrument(skip(self), fields(cache = %self.config.name))]
    pub async fn delete_by_tags(&self, tags: &[&str]) -> Result<usize> {
        if !self.is_enabled() || tags.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let snapshot = match self.store.iterate().await {
            Ok(entries) => entries,
            Err(e) => return self.degrade(e, "*", start).map(|_| 0),
        };

        let matched: Vec<String> = snapshot
            .into_iter()
            .filter_map(|(key, bytes)| match CacheEntry::decode(&bytes) {
                Ok(entry) if tags.iter().any(|t| entry.has_tag(t)) => Some(key),
                Ok(_) => None,
                Err(e) => {
                    debug!(key = %key, "Skipping undecodable entry: {}", e);
                    None
                }
            })
            .collect();

        let deletions = matched.iter().map(|key| async move {
            let op_start = Instant::now();
            let result = self.store.delete(key).await;
            (key, op_start, op_start.elapsed(), result)
        });

        let mut removed = 0;
        for (key, op_start, latency, result) in join_all(deletions).await {
            match result {
                Ok(true) => {
                    self.stats.record_delete(latency, Some(key.as_str()), None);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => self.degrade(e, key, op_start)?,
            }
        }

        info!(removed, "Invalidated entries by tag");
        Ok(removed)
    }

    /// Raw stored entry (value, tags, write time) without statistics
    pub async fn entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let start = Instant::now();
        match self.read_entry(key).await {
            Ok(entry) => Ok(entry),
            Err(e) => self.degrade(e, key, start).map(|_| None),
        }
    }

    /// Tags stored with `key`, empty when absent
    pub async fn tags_of(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.entry(key).await?.map(|e| e.tags).unwrap_or_default())
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Persist the current statistics window with store gauges
    pub async fn persist_now(&self) -> Result<()> {
        let gauges = Gauges::from_store(&self.store.stats(), self.stats.uptime_secs());
        self.stats.persist(gauges).await
    }

    /// Start the periodic rollup on the current runtime
    pub fn spawn_rollup(&self) -> (Arc<RollupTask>, JoinHandle<()>) {
        let task = RollupTask::new(
            Arc::clone(&self.stats),
            Arc::clone(&self.store),
            self.stats.persistence_interval(),
        );
        let handle = task.spawn();
        (task, handle)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    pub(crate) async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(CacheEntry::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn write_entry(
        &self,
        key: &str,
        value: Value,
        tags: Vec<String>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = CacheEntry::new(value, tags).encode()?;
        self.store.set(key, bytes, ttl).await
    }

    /// Count and log a failed store interaction; returns the error only in
    /// strict mode
    pub(crate) fn degrade(&self, error: Error, key: &str, start: Instant) -> Result<()> {
        self.stats.record_error(start.elapsed(), Some(key));
        if self.config.throw_on_error || !error.is_store_error() {
            warn!(cache = %self.config.name, key, "Cache operation failed: {}", error);
            return Err(error);
        }
        warn!(
            cache = %self.config.name,
            key,
            "Cache operation failed, continuing without cache: {}",
            error
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tags::{FieldTag, TagConfig};
    use serde::Deserialize;
    use serde_json::json;

    fn engine() -> CacheEngine {
        CacheEngine::in_memory(CacheConfig::new("test"))
    }

    #[tokio::test]
    async fn test_get_set_records_statistics() {
        let engine = engine();
        assert_eq!(engine.get("k").await.unwrap(), None);

        engine
            .set("k", json!({"v": 1}), SetOptions::new())
            .await
            .unwrap();
        assert_eq!(engine.get("k").await.unwrap(), Some(json!({"v": 1})));

        let stats = engine.statistics().current_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
    }

    #[tokio::test]
    async fn test_has_does_not_record() {
        let engine = engine();
        engine.set("k", json!(1), SetOptions::new()).await.unwrap();
        assert!(engine.has("k").await.unwrap());
        assert!(!engine.has("missing").await.unwrap());

        let stats = engine.statistics().current_stats().unwrap();
        assert_eq!(stats.total_requests, 0);
    }

    #[tokio::test]
    async fn test_set_resolves_tags() {
        let engine = engine();
        let options = SetOptions::new()
            .with_tag("books")
            .with_tag(TagConfig::Data(FieldTag::new(["ID"]).with_prefix("book:")));
        engine
            .set("books:all", json!([{"ID": 1}, {"ID": 2}]), options)
            .await
            .unwrap();

        assert_eq!(
            engine.tags_of("books:all").await.unwrap(),
            vec!["books", "book:1", "book:2"]
        );
    }

    #[tokio::test]
    async fn test_delete_by_tag() {
        let engine = engine();
        engine
            .set("a", json!(1), SetOptions::new().with_tag("x"))
            .await
            .unwrap();
        engine
            .set("b", json!(2), SetOptions::new().with_tag("x").with_tag("y"))
            .await
            .unwrap();
        engine
            .set("c", json!(3), SetOptions::new().with_tag("y"))
            .await
            .unwrap();

        assert_eq!(engine.delete_by_tag("x").await.unwrap(), 2);
        assert!(!engine.has("a").await.unwrap());
        assert!(!engine.has("b").await.unwrap());
        assert!(engine.has("c").await.unwrap());
        assert_eq!(engine.delete_by_tag("x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_tags_any() {
        let engine = engine();
        engine
            .set("a", json!(1), SetOptions::new().with_tag("x"))
            .await
            .unwrap();
        engine
            .set("b", json!(2), SetOptions::new().with_tag("y"))
            .await
            .unwrap();
        assert_eq!(engine.delete_by_tags(&["x", "y"]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let engine = engine();
        engine
            .set(
                "short",
                json!("v"),
                SetOptions::new().with_ttl(Duration::from_millis(30)),
            )
            .await
            .unwrap();
        assert!(engine.has("short").await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!engine.has("short").await.unwrap());
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Book {
            id: u32,
            title: String,
        }

        let engine = engine();
        let book = Book {
            id: 7,
            title: "Dune".into(),
        };
        engine.set_as("book:7", &book, SetOptions::new()).await.unwrap();
        assert_eq!(engine.get_as::<Book>("book:7").await.unwrap(), Some(book));
    }

    #[tokio::test]
    async fn test_disabled_engine_is_noop() {
        let engine = CacheEngine::in_memory(CacheConfig::new("off").with_enabled(false));
        engine.set("k", json!(1), SetOptions::new()).await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), None);
        assert!(engine.store().iterate().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let engine = engine();
        engine.set("k", json!(1), SetOptions::new()).await.unwrap();
        engine.get("k").await.unwrap();
        engine.persist_now().await.unwrap();
        engine.get("k").await.unwrap();

        engine.clear().await.unwrap();
        assert!(!engine.has("k").await.unwrap());
        assert_eq!(engine.statistics().current_stats().unwrap().hits, 0);
        assert!(engine
            .statistics()
            .stats(None, None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_runtime_configuration() {
        let engine = CacheEngine::in_memory(
            CacheConfig::new("cfg").with_default_ttl(Duration::from_secs(2)),
        );
        engine.set_key_tracking_enabled(false);
        let cfg = engine.runtime_configuration();
        assert_eq!(cfg.name, "cfg");
        assert_eq!(cfg.default_ttl_ms, Some(2000));
        assert!(!cfg.statistics.enable_key_tracking);
    }
}
