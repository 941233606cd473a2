//! Statistics Engine
//!
//! Records cache operations into a locked [`StatWindow`] and rolls windows
//! up into persisted hourly and daily buckets.
//!
//! ```text
//!   record_*  ──►  Mutex<StatWindow>  ──take──►  persist()  ──►  StatsRepository
//!                         ▲                          │
//!                         └──────── absorb ◄─────────┘ (on failure)
//! ```
//!
//! No repository I/O happens while the window lock is held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use super::aggregate::{AggregateRecord, KeyAccessRecord, Period};
use super::repository::{InMemoryStatsRepository, RollupBatch, StatsRepository};
use super::summary::{CacheStatistics, Gauges};
use super::window::{KeyAccess, Operation, StatWindow};
use crate::error::Result;

// =============================================================================
// Configuration
// =============================================================================

/// Statistics configuration
#[derive(Debug, Clone)]
pub struct StatisticsConfig {
    pub enabled: bool,
    pub enable_key_tracking: bool,
    /// Samples kept per latency buffer
    pub max_latencies: usize,
    /// Keys kept in the access map
    pub max_key_tracking: usize,
    pub persistence_interval: Duration,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_key_tracking: true,
            max_latencies: 1000,
            max_key_tracking: 1000,
            persistence_interval: Duration::from_secs(60),
        }
    }
}

impl StatisticsConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_key_tracking(mut self, enabled: bool) -> Self {
        self.enable_key_tracking = enabled;
        self
    }

    pub fn with_max_latencies(mut self, max: usize) -> Self {
        self.max_latencies = max;
        self
    }

    pub fn with_max_key_tracking(mut self, max: usize) -> Self {
        self.max_key_tracking = max;
        self
    }

    pub fn with_persistence_interval(mut self, interval: Duration) -> Self {
        self.persistence_interval = interval;
        self
    }
}

/// Effective settings, including runtime toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeConfiguration {
    pub enabled: bool,
    pub enable_key_tracking: bool,
    pub max_latencies: usize,
    pub max_key_tracking: usize,
    pub persistence_interval_secs: u64,
}

/// Access counters for one key, as reported by the query surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyStats {
    pub key: String,
    pub total: u64,
    #[serde(flatten)]
    pub access: KeyAccess,
}

// =============================================================================
// Engine
// =============================================================================

/// Per-cache statistics
pub struct StatisticsEngine {
    cache: String,
    config: StatisticsConfig,
    enabled: AtomicBool,
    key_tracking: AtomicBool,
    window: Mutex<StatWindow>,
    repository: Arc<dyn StatsRepository>,
    /// Serializes read-modify-write cycles against the repository
    persist_lock: tokio::sync::Mutex<()>,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for StatisticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsEngine")
            .field("cache", &self.cache)
            .field("config", &self.runtime_configuration())
            .finish()
    }
}

impl StatisticsEngine {
    pub fn new(
        cache: impl Into<String>,
        config: StatisticsConfig,
        repository: Arc<dyn StatsRepository>,
    ) -> Self {
        let window = StatWindow::new(config.max_latencies, config.max_key_tracking);
        Self {
            cache: cache.into(),
            enabled: AtomicBool::new(config.enabled),
            key_tracking: AtomicBool::new(config.enable_key_tracking),
            config,
            window: Mutex::new(window),
            repository,
            persist_lock: tokio::sync::Mutex::new(()),
            started_at: Utc::now(),
        }
    }

    /// Engine backed by an [`InMemoryStatsRepository`]
    pub fn in_memory(cache: impl Into<String>, config: StatisticsConfig) -> Self {
        Self::new(cache, config, Arc::new(InMemoryStatsRepository::new()))
    }

    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    pub fn repository(&self) -> &Arc<dyn StatsRepository> {
        &self.repository
    }

    pub fn persistence_interval(&self) -> Duration {
        self.config.persistence_interval
    }

    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    // =========================================================================
    // Runtime toggles
    // =========================================================================

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!(cache = %self.cache, enabled, "Statistics toggled");
    }

    pub fn is_key_tracking_enabled(&self) -> bool {
        self.key_tracking.load(Ordering::Relaxed)
    }

    pub fn set_key_tracking_enabled(&self, enabled: bool) {
        self.key_tracking.store(enabled, Ordering::Relaxed);
        info!(cache = %self.cache, enabled, "Key tracking toggled");
    }

    pub fn runtime_configuration(&self) -> RuntimeConfiguration {
        RuntimeConfiguration {
            enabled: self.is_enabled(),
            enable_key_tracking: self.is_key_tracking_enabled(),
            max_latencies: self.config.max_latencies,
            max_key_tracking: self.config.max_key_tracking,
            persistence_interval_secs: self.config.persistence_interval.as_secs(),
        }
    }

    // =========================================================================
    // Recording
    // =========================================================================

    pub fn record_hit(&self, latency: Duration, key: Option<&str>, metadata: Option<Value>) {
        self.record(Operation::Hit, latency, key, metadata);
    }

    pub fn record_miss(&self, latency: Duration, key: Option<&str>, metadata: Option<Value>) {
        self.record(Operation::Miss, latency, key, metadata);
    }

    pub fn record_set(&self, latency: Duration, key: Option<&str>, metadata: Option<Value>) {
        self.record(Operation::Set, latency, key, metadata);
    }

    pub fn record_delete(&self, latency: Duration, key: Option<&str>, metadata: Option<Value>) {
        self.record(Operation::Delete, latency, key, metadata);
    }

    pub fn record_error(&self, latency: Duration, key: Option<&str>) {
        self.record(Operation::Error, latency, key, None);
    }

    fn record(&self, op: Operation, latency: Duration, key: Option<&str>, metadata: Option<Value>) {
        if !self.is_enabled() {
            return;
        }
        let track = self.is_key_tracking_enabled();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.window.lock().record(op, latency_ms, key, metadata, track);
    }

    // =========================================================================
    // Query surface
    // =========================================================================

    /// Statistics of the live window
    pub fn current_stats(&self) -> Option<CacheStatistics> {
        if !self.is_enabled() {
            return None;
        }
        let window = self.window.lock();
        Some(CacheStatistics::from_window(&window, Utc::now()))
    }

    /// Most accessed keys of the live window, highest total first
    pub fn top_accessed_keys(&self, limit: usize) -> Vec<KeyStats> {
        let mut keys = self.key_snapshot();
        keys.sort_by(|a, b| {
            b.total
                .cmp(&a.total)
                .then(b.access.last_access.cmp(&a.access.last_access))
                .then(a.key.cmp(&b.key))
        });
        keys.truncate(limit);
        keys
    }

    /// Least accessed keys of the live window, oldest access first on ties
    pub fn cold_keys(&self, limit: usize) -> Vec<KeyStats> {
        let mut keys = self.key_snapshot();
        keys.sort_by(|a, b| {
            a.total
                .cmp(&b.total)
                .then(a.access.last_access.cmp(&b.access.last_access))
                .then(a.key.cmp(&b.key))
        });
        keys.truncate(limit);
        keys
    }

    fn key_snapshot(&self) -> Vec<KeyStats> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let window = self.window.lock();
        window
            .key_access
            .iter()
            .map(|(key, access)| KeyStats {
                key: key.clone(),
                total: access.total(),
                access: access.clone(),
            })
            .collect()
    }

    /// Persisted buckets, most recent first
    pub async fn stats(
        &self,
        period: Option<Period>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AggregateRecord>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        self.repository
            .list_aggregates(&self.cache, period, from, to)
            .await
    }

    /// Persisted key rows, highest total first
    pub async fn persisted_key_access(&self, limit: usize) -> Result<Vec<KeyAccessRecord>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        let mut rows = self.repository.list_key_access(&self.cache).await?;
        rows.sort_by(|a, b| b.total.cmp(&a.total).then(a.key.cmp(&b.key)));
        rows.truncate(limit);
        Ok(rows)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Take the live window and merge it into the hourly and daily buckets.
    /// On failure the window is restored and the error returned.
    #[instrument(skip(self, gauges), fields(cache = %self.cache))]
    pub async fn persist(&self, gauges: Gauges) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let _guard = self.persist_lock.lock().await;

        let taken = self.window.lock().take();
        if taken.is_empty() {
            debug!("Nothing to persist");
            return Ok(());
        }

        let now = Utc::now();
        let stats = CacheStatistics::from_window(&taken, now).with_gauges(gauges);

        match self.write_rollup(&taken, &stats, now).await {
            Ok(()) => {
                debug!(
                    hits = stats.hits,
                    misses = stats.misses,
                    keys = taken.key_access.len(),
                    "Persisted statistics window"
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to persist statistics: {}", e);
                self.window.lock().absorb(taken);
                Err(e)
            }
        }
    }

    /// Merge the window into the current rows in memory, then hand the
    /// whole result to the repository as one batch.
    async fn write_rollup(
        &self,
        window: &StatWindow,
        stats: &CacheStatistics,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut batch = RollupBatch::default();

        for period in Period::ALL {
            let bucket = period.bucket_start(now);
            let mut record = self
                .repository
                .find_aggregate(&self.cache, period, bucket)
                .await?
                .unwrap_or_else(|| AggregateRecord::empty(&self.cache, period, bucket));
            record.merge_window(stats, now);
            batch.aggregates.push(record);
        }

        for (key, access) in &window.key_access {
            let mut row = self
                .repository
                .find_key_access(&self.cache, key)
                .await?
                .unwrap_or_else(|| KeyAccessRecord::new(&self.cache, key, access.last_access));
            row.merge(access);
            batch.key_rows.push(row);
        }

        self.repository.save_rollup(batch).await
    }

    /// Remove persisted buckets in range; returns the number removed
    #[instrument(skip(self), fields(cache = %self.cache))]
    pub async fn delete_persisted(
        &self,
        period: Option<Period>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let removed = self
            .repository
            .delete_aggregates(&self.cache, period, from, to)
            .await?;
        info!(removed, "Deleted persisted statistics");
        Ok(removed)
    }

    /// Drop the live window
    pub fn reset(&self) {
        let mut window = self.window.lock();
        let _ = window.take();
        debug!(cache = %self.cache, "Statistics window reset");
    }

    /// Drop the live window and every persisted row of this cache
    pub async fn reset_all(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        self.reset();
        self.repository
            .delete_aggregates(&self.cache, None, None, None)
            .await?;
        self.repository.delete_key_access(&self.cache).await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
