//! Property-Based Tests for Statistics
//!
//! # Test Properties
//!
//! 1. **Bounded buffers**: a latency buffer never exceeds its capacity and
//!    always holds the newest samples
//! 2. **Percentile index**: p95/p99 equal the value at `floor(n * p)` of the
//!    sorted samples
//! 3. **Bounded key tracking**: the access map never exceeds its cap
//! 4. **Lossless restore**: take followed by absorb preserves every counter
//! 5. **Rollup merge**: merging windows one by one matches a single merge of
//!    the combined counts

#![cfg(test)]

use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;

use super::aggregate::{AggregateRecord, Period};
use super::summary::{percentile, CacheStatistics, Gauges, LatencySummary};
use super::window::{LatencyBuffer, Operation, StatWindow};
use super::{StatisticsConfig, StatisticsEngine};

// =============================================================================
// Property Strategies
// =============================================================================

fn samples_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..10_000.0, 1..2000)
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Hit),
        Just(Operation::Miss),
        Just(Operation::Set),
        Just(Operation::Delete),
        Just(Operation::Error),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<(Operation, u8)>> {
    prop::collection::vec((operation_strategy(), 0u8..50), 0..300)
}

// =============================================================================
// Buffer Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_buffer_keeps_newest(samples in samples_strategy(), cap in 1usize..1500) {
        let mut buf = LatencyBuffer::new(cap);
        for s in &samples {
            buf.push(*s);
        }

        let expected_len = samples.len().min(cap);
        prop_assert_eq!(buf.len(), expected_len);
        prop_assert_eq!(buf.samples(), samples[samples.len() - expected_len..].to_vec());
    }

    #[test]
    fn prop_percentile_matches_index(samples in samples_strategy()) {
        let summary = LatencySummary::from_samples(&samples);
        let mut sorted = samples.clone();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();

        let p95_idx = ((n as f64 * 0.95).floor() as usize).min(n - 1);
        let p99_idx = ((n as f64 * 0.99).floor() as usize).min(n - 1);
        prop_assert_eq!(summary.p95, sorted[p95_idx]);
        prop_assert_eq!(summary.p99, sorted[p99_idx]);
        prop_assert_eq!(summary.min, sorted[0]);
        prop_assert_eq!(summary.max, sorted[n - 1]);
        prop_assert!(summary.p95 <= summary.p99);
        prop_assert_eq!(percentile(&sorted, 1.0), sorted[n - 1]);
    }
}

// =============================================================================
// Window Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_key_map_bounded(ops in ops_strategy(), cap in 1usize..20) {
        let mut window = StatWindow::new(100, cap);
        for (op, key) in &ops {
            let key = format!("key:{}", key);
            window.record(*op, 1.0, Some(&key), None, true);
            prop_assert!(window.key_access.len() <= cap);
        }
    }

    #[test]
    fn prop_take_absorb_lossless(first in ops_strategy(), second in ops_strategy()) {
        let mut window = StatWindow::new(10_000, 10_000);
        for (op, key) in &first {
            window.record(*op, 1.0, Some(&key.to_string()), None, true);
        }
        let before = (window.hits, window.misses, window.sets, window.deletes, window.errors);

        let taken = window.take();
        for (op, key) in &second {
            window.record(*op, 1.0, Some(&key.to_string()), None, true);
        }
        let during = (window.hits, window.misses, window.sets, window.deletes, window.errors);
        window.absorb(taken);

        prop_assert_eq!(window.hits, before.0 + during.0);
        prop_assert_eq!(window.misses, before.1 + during.1);
        prop_assert_eq!(window.sets, before.2 + during.2);
        prop_assert_eq!(window.deletes, before.3 + during.3);
        prop_assert_eq!(window.errors, before.4 + during.4);

        let tracked: u64 = window.key_access.values().map(|a| a.total()).sum();
        let recorded = window.hits + window.misses + window.sets + window.deletes;
        prop_assert_eq!(tracked, recorded);
    }

    #[test]
    fn prop_engine_counts_match(ops in ops_strategy()) {
        let engine = StatisticsEngine::in_memory("prop", StatisticsConfig::default());
        for (op, key) in &ops {
            let key = key.to_string();
            let latency = Duration::from_micros(100);
            match op {
                Operation::Hit => engine.record_hit(latency, Some(&key), None),
                Operation::Miss => engine.record_miss(latency, Some(&key), None),
                Operation::Set => engine.record_set(latency, Some(&key), None),
                Operation::Delete => engine.record_delete(latency, Some(&key), None),
                Operation::Error => engine.record_error(latency, Some(&key)),
            }
        }

        let expected = |kind: Operation| ops.iter().filter(|(op, _)| *op == kind).count() as u64;
        let stats = engine.current_stats().unwrap();
        prop_assert_eq!(stats.hits, expected(Operation::Hit));
        prop_assert_eq!(stats.misses, expected(Operation::Miss));
        prop_assert_eq!(stats.errors, expected(Operation::Error));
        prop_assert_eq!(stats.total_requests, stats.hits + stats.misses);
    }
}

// =============================================================================
// Rollup Properties
// =============================================================================

fn hit_window(hits: u64, avg: f64) -> CacheStatistics {
    let mut window = StatWindow::new(1, 1);
    window.hits = hits;
    let mut stats = CacheStatistics::from_window(&window, Utc::now());
    stats.hit_latency.avg = avg;
    stats
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_weighted_average_is_count_weighted(
        parts in prop::collection::vec((1u64..1000, 0.0f64..500.0), 1..10)
    ) {
        let mut record = AggregateRecord::empty("prop", Period::Hourly, Utc::now());
        for (hits, avg) in &parts {
            record.merge_window(&hit_window(*hits, *avg), Utc::now());
        }

        let total: u64 = parts.iter().map(|(h, _)| h).sum();
        let weighted: f64 = parts.iter().map(|(h, a)| *h as f64 * a).sum::<f64>() / total as f64;
        prop_assert_eq!(record.hits, total);
        prop_assert!((record.avg_hit_latency - weighted).abs() < 1e-6);
    }

    #[test]
    fn prop_persist_preserves_totals(ops in ops_strategy()) {
        let engine = StatisticsEngine::in_memory("prop", StatisticsConfig::default());
        for (op, _) in &ops {
            match op {
                Operation::Hit => engine.record_hit(Duration::from_micros(50), None, None),
                Operation::Miss => engine.record_miss(Duration::from_micros(50), None, None),
                _ => {}
            }
        }
        let hits = engine.current_stats().unwrap().hits;

        let rows = tokio_test::block_on(async {
            engine.persist(Gauges::default()).await.unwrap();
            engine.stats(Some(Period::Daily), None, None).await.unwrap()
        });

        let persisted: u64 = rows.iter().map(|r| r.hits).sum();
        prop_assert_eq!(persisted, hits);
    }
}
