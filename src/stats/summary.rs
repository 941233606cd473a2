//! Computed statistics
//!
//! Percentiles are computed on demand over a window's bounded buffers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::window::{LatencyBuffer, StatWindow};
use crate::store::StoreStats;

/// Value at index `floor(n * p)` of an ascending slice, clamped to the last
/// element. Zero for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// How many times slower a miss is than a hit
pub fn cache_efficiency(avg_hit: f64, avg_miss: f64) -> Option<f64> {
    (avg_hit > 0.0 && avg_miss > 0.0).then(|| avg_miss / avg_hit)
}

/// Latency summary in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencySummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        Self {
            count: n,
            avg: sorted.iter().sum::<f64>() / n as f64,
            min: sorted[0],
            max: sorted[n - 1],
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }

    fn from_buffer(buffer: &LatencyBuffer) -> Self {
        Self::from_samples(&buffer.samples())
    }
}

/// Point-in-time values overwritten on every rollup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gauges {
    pub memory_usage_bytes: u64,
    pub item_count: u64,
    pub uptime_secs: u64,
}

impl Gauges {
    pub fn from_store(store: &StoreStats, uptime_secs: u64) -> Self {
        Self {
            memory_usage_bytes: store.total_bytes,
            item_count: store.item_count,
            uptime_secs,
        }
    }
}

/// Statistics of one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    /// Hits plus misses
    pub total_requests: u64,
    pub hit_ratio: f64,
    pub miss_ratio: f64,
    /// Requests per second since the window started
    pub throughput: f64,

    pub latency: LatencySummary,
    pub hit_latency: LatencySummary,
    pub miss_latency: LatencySummary,
    pub set_latency: LatencySummary,
    pub delete_latency: LatencySummary,
    pub cache_efficiency: Option<f64>,

    #[serde(flatten)]
    pub gauges: Gauges,
    pub tracked_keys: usize,
    pub window_start: DateTime<Utc>,
    pub last_reset: DateTime<Utc>,
}

impl CacheStatistics {
    pub fn from_window(window: &StatWindow, now: DateTime<Utc>) -> Self {
        let total = window.hits + window.misses;
        let (hit_ratio, miss_ratio) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                window.hits as f64 / total as f64,
                window.misses as f64 / total as f64,
            )
        };

        let elapsed = (now - window.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let throughput = if elapsed > 0.0 {
            total as f64 / elapsed
        } else {
            0.0
        };

        let hit_latency = LatencySummary::from_buffer(&window.hit_latencies);
        let miss_latency = LatencySummary::from_buffer(&window.miss_latencies);
        let cache_efficiency = cache_efficiency(hit_latency.avg, miss_latency.avg);

        Self {
            hits: window.hits,
            misses: window.misses,
            sets: window.sets,
            deletes: window.deletes,
            errors: window.errors,
            total_requests: total,
            hit_ratio,
            miss_ratio,
            throughput,
            latency: LatencySummary::from_buffer(&window.latencies),
            hit_latency,
            miss_latency,
            set_latency: LatencySummary::from_buffer(&window.set_latencies),
            delete_latency: LatencySummary::from_buffer(&window.delete_latencies),
            cache_efficiency,
            gauges: Gauges::default(),
            tracked_keys: window.key_access.len(),
            window_start: window.start_time,
            last_reset: window.last_reset,
        }
    }

    pub fn with_gauges(mut self, gauges: Gauges) -> Self {
        self.gauges = gauges;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
