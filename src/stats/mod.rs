//! Cache Statistics
//!
//! Hit/miss counters, bounded latency windows, per-key access tracking and
//! periodic rollup into persisted hourly and daily buckets.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      StatisticsEngine                        │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ StatWindow   │   │ Summary      │   │ AggregateRecord  │  │
//! │  │ (counters,   │──►│ (p95, p99,   │──►│ (hourly / daily  │  │
//! │  │  latencies)  │   │  ratios)     │   │  weighted merge) │  │
//! │  └──────────────┘   └──────────────┘   └────────┬─────────┘  │
//! └─────────────────────────────────────────────────┼────────────┘
//!                                                   ▼
//!                      RollupTask ──────────► StatsRepository
//! ```

pub mod aggregate;
pub mod engine;
pub mod repository;
pub mod rollup;
pub mod summary;
pub mod window;

mod proptest;

pub use aggregate::{weighted_average, AggregateRecord, KeyAccessRecord, Period};
pub use engine::{KeyStats, RuntimeConfiguration, StatisticsConfig, StatisticsEngine};
pub use repository::{InMemoryStatsRepository, RollupBatch, StatsRepository};
pub use rollup::RollupTask;
pub use summary::{cache_efficiency, percentile, CacheStatistics, Gauges, LatencySummary};
pub use window::{KeyAccess, LatencyBuffer, Operation, StatWindow};
