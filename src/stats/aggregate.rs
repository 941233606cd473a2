//! Persisted rollup records
//!
//! One [`AggregateRecord`] per (cache, period, bucket). Each persistence
//! cycle folds the current window into the hourly and daily buckets:
//!
//! ```text
//!   counters           old + window
//!   averages           (old_avg * old_n + win_avg * win_n) / (old_n + win_n)
//!   max / p95 / p99    max(old, window)
//!   min                min over non-zero values
//!   gauges             overwritten
//! ```

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use super::summary::{CacheStatistics, Gauges};
use super::window::KeyAccess;

/// Rollup granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hourly,
    Daily,
}

impl Period {
    pub const ALL: [Period; 2] = [Period::Hourly, Period::Daily];

    pub fn duration(&self) -> ChronoDuration {
        match self {
            Period::Hourly => ChronoDuration::hours(1),
            Period::Daily => ChronoDuration::days(1),
        }
    }

    /// Start of the UTC bucket containing `at`
    pub fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.duration_trunc(self.duration()).unwrap_or(at)
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Hourly => write!(f, "hourly"),
            Period::Daily => write!(f, "daily"),
        }
    }
}

impl std::str::FromStr for Period {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Ok(Period::Hourly),
            "daily" | "day" => Ok(Period::Daily),
            other => Err(crate::error::Error::Config(format!(
                "unknown period: {}",
                other
            ))),
        }
    }
}

/// Count-weighted average; keeps `old_avg` when both counts are zero
pub fn weighted_average(old_avg: f64, old_n: u64, win_avg: f64, win_n: u64) -> f64 {
    let total = old_n + win_n;
    if total == 0 {
        return old_avg;
    }
    (old_avg * old_n as f64 + win_avg * win_n as f64) / total as f64
}

fn min_non_zero(a: f64, b: f64) -> f64 {
    match (a > 0.0, b > 0.0) {
        (true, true) => a.min(b),
        (true, false) => a,
        (false, true) => b,
        (false, false) => 0.0,
    }
}

// =============================================================================
// Aggregate Record
// =============================================================================

/// Rolled-up statistics for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub cache: String,
    pub period: Period,
    pub bucket_start: DateTime<Utc>,

    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub total_requests: u64,
    pub hit_ratio: f64,

    pub avg_latency: f64,
    pub avg_hit_latency: f64,
    pub avg_miss_latency: f64,
    pub avg_set_latency: f64,
    pub avg_delete_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,

    #[serde(flatten)]
    pub gauges: Gauges,
    pub updated_at: DateTime<Utc>,
}

impl AggregateRecord {
    pub fn empty(cache: impl Into<String>, period: Period, bucket_start: DateTime<Utc>) -> Self {
        Self {
            cache: cache.into(),
            period,
            bucket_start,
            hits: 0,
            misses: 0,
            sets: 0,
            deletes: 0,
            errors: 0,
            total_requests: 0,
            hit_ratio: 0.0,
            avg_latency: 0.0,
            avg_hit_latency: 0.0,
            avg_miss_latency: 0.0,
            avg_set_latency: 0.0,
            avg_delete_latency: 0.0,
            min_latency: 0.0,
            max_latency: 0.0,
            p95_latency: 0.0,
            p99_latency: 0.0,
            gauges: Gauges::default(),
            updated_at: bucket_start,
        }
    }

    /// Fold a window into this bucket
    pub fn merge_window(&mut self, window: &CacheStatistics, now: DateTime<Utc>) {
        // Averages first, they weigh by the counts before this window.
        self.avg_latency = weighted_average(
            self.avg_latency,
            self.hits + self.misses,
            window.latency.avg,
            window.hits + window.misses,
        );
        self.avg_hit_latency =
            weighted_average(self.avg_hit_latency, self.hits, window.hit_latency.avg, window.hits);
        self.avg_miss_latency = weighted_average(
            self.avg_miss_latency,
            self.misses,
            window.miss_latency.avg,
            window.misses,
        );
        self.avg_set_latency =
            weighted_average(self.avg_set_latency, self.sets, window.set_latency.avg, window.sets);
        self.avg_delete_latency = weighted_average(
            self.avg_delete_latency,
            self.deletes,
            window.delete_latency.avg,
            window.deletes,
        );

        self.min_latency = min_non_zero(self.min_latency, window.latency.min);
        self.max_latency = self.max_latency.max(window.latency.max);
        self.p95_latency = self.p95_latency.max(window.latency.p95);
        self.p99_latency = self.p99_latency.max(window.latency.p99);

        self.hits += window.hits;
        self.misses += window.misses;
        self.sets += window.sets;
        self.deletes += window.deletes;
        self.errors += window.errors;
        self.total_requests = self.hits + self.misses;
        self.hit_ratio = if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        };

        self.gauges = window.gauges;
        self.updated_at = now;
    }
}

// =============================================================================
// Key Access Record
// =============================================================================

/// Persisted per-key access counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyAccessRecord {
    pub cache: String,
    pub key: String,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub total: u64,
    pub last_access: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl KeyAccessRecord {
    pub fn new(cache: impl Into<String>, key: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            cache: cache.into(),
            key: key.into(),
            hits: 0,
            misses: 0,
            sets: 0,
            deletes: 0,
            total: 0,
            last_access: at,
            metadata: None,
        }
    }

    pub fn merge(&mut self, access: &KeyAccess) {
        self.hits += access.hits;
        self.misses += access.misses;
        self.sets += access.sets;
        self.deletes += access.deletes;
        self.total = self.hits + self.misses + self.sets + self.deletes;
        self.last_access = self.last_access.max(access.last_access);
        if access.metadata.is_some() {
            self.metadata = access.metadata.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
