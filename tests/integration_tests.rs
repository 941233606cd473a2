//! Cachewise Integration Tests
//!
//! End-to-end behaviour through the public API:
//! - Read-through calls (wrap, exec, run)
//! - Tag invalidation and TTL expiry
//! - Store failure handling (lenient and strict)
//! - Statistics accumulation and rollup

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use cachewise::cache::{FieldTag, QueryContext, RequestContext};
use cachewise::stats::Gauges;
use cachewise::store::StoreStats;
use cachewise::{
    CacheAnnotation, CacheConfig, CacheEngine, CacheOptions, CacheOutcome, CacheStore, Error,
    InMemoryStore, KeySubject, Period, SetOptions, StatisticsConfig, StatisticsEngine, TagConfig,
};

/// Store whose operations fail while `down` is set
struct FlakyStore {
    inner: InMemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            down: AtomicBool::new(false),
        }
    }

    fn check(&self) -> cachewise::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::Store("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get(&self, key: &str) -> cachewise::Result<Option<Bytes>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> cachewise::Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> cachewise::Result<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn clear(&self) -> cachewise::Result<()> {
        self.check()?;
        self.inner.clear().await
    }

    async fn iterate(&self) -> cachewise::Result<Vec<(String, Bytes)>> {
        self.check()?;
        self.inner.iterate().await
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }
}

fn counting_producer(
    calls: Arc<AtomicUsize>,
) -> impl Fn(Vec<Value>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, Error>> + Send>>
{
    move |args: Vec<Value>| {
        let calls = calls.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"id": args.first().cloned().unwrap_or(Value::Null), "name": "Ada"}))
        })
    }
}

// =============================================================================
// Read-Through
// =============================================================================

mod read_through_tests {
    use super::*;

    #[tokio::test]
    async fn test_wrap_end_to_end() {
        let engine = Arc::new(CacheEngine::in_memory(CacheConfig::new("users")));
        let calls = Arc::new(AtomicUsize::new(0));
        let load_user = engine.wrap(
            "user:{args[0]}",
            counting_producer(calls.clone()),
            CacheOptions::new(),
        );

        let first: CacheOutcome = load_user.call(&[json!(42)]).await.unwrap();
        assert!(!first.hit);
        assert_eq!(first.header(), Some(("x-cache-key", "user:42")));

        let second: CacheOutcome = load_user.call(&[json!(42)]).await.unwrap();
        assert!(second.hit);
        assert_eq!(second.result, first.result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = engine.statistics().current_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        let top = engine.statistics().top_accessed_keys(1);
        assert_eq!(top[0].key, "user:42");
        assert_eq!(top[0].total, 2);
    }

    #[tokio::test]
    async fn test_hit_ratio_over_workload() {
        let engine = Arc::new(CacheEngine::in_memory(CacheConfig::new("ratio")));
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapped = engine.wrap("item", counting_producer(calls.clone()), CacheOptions::new());

        // 4 distinct keys, 5 rounds: 4 misses then 16 hits
        for _ in 0..5 {
            for id in 0..4 {
                let _: CacheOutcome = wrapped.call(&[json!(id)]).await.unwrap();
            }
        }

        let stats = engine.statistics().current_stats().unwrap();
        assert_eq!(stats.misses, 4);
        assert_eq!(stats.hits, 16);
        assert!((stats.hit_ratio - 0.8).abs() < 1e-9);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_with_request_subject() {
        let engine = CacheEngine::in_memory(CacheConfig::new("requests"));
        let read = KeySubject::Request(
            RequestContext::new("GET").with_params(json!({"id": 7})),
        );
        let write = KeySubject::Request(
            RequestContext::new("UPDATE").with_params(json!({"id": 7})),
        );
        let options = CacheOptions::new()
            .with_tag(TagConfig::Param(FieldTag::new(["id"]).with_prefix("book:")));

        let first: CacheOutcome = engine
            .run(&read, || async { Ok::<_, Error>(json!("v1")) }, &options)
            .await
            .unwrap();
        let key = first.key.clone().unwrap();
        assert_eq!(engine.tags_of(&key).await.unwrap(), vec!["book:7"]);

        let updated: CacheOutcome = engine
            .run(&write, || async { Ok::<_, Error>(json!("saved")) }, &options)
            .await
            .unwrap();
        assert_eq!(updated.key, None);

        // Invalidate what the write touched, next read misses
        assert_eq!(engine.delete_by_tag("book:7").await.unwrap(), 1);
        let again: CacheOutcome = engine
            .run(&read, || async { Ok::<_, Error>(json!("v2")) }, &options)
            .await
            .unwrap();
        assert!(!again.hit);
        assert_eq!(again.result, json!("v2"));
        assert_eq!(again.key, Some(key));
    }

    #[tokio::test]
    async fn test_query_key_is_stable() {
        let engine = CacheEngine::in_memory(CacheConfig::new("queries"));
        let a = KeySubject::Query(QueryContext::select(json!({"from": "Books", "limit": 10})));
        let b = KeySubject::Query(QueryContext::select(json!({"limit": 10, "from": "Books"})));

        let first: CacheOutcome = engine
            .run(&a, || async { Ok::<_, Error>(json!([1, 2])) }, &CacheOptions::new())
            .await
            .unwrap();
        let second: CacheOutcome = engine
            .run(&b, || async { Ok::<_, Error>(json!([])) }, &CacheOptions::new())
            .await
            .unwrap();

        assert_eq!(first.key, second.key);
        assert!(second.hit);
        assert_eq!(second.result, json!([1, 2]));
    }

    #[tokio::test]
    async fn test_annotation_drives_options() {
        let annotation = CacheAnnotation::from_yaml(
            r#"
ttl: 40
key:
  template: "books:{args[0]}"
tags:
  - books
"#,
        )
        .unwrap();

        let engine = CacheEngine::in_memory(CacheConfig::new("annotated"));
        let outcome: CacheOutcome = engine
            .exec(
                "ignored",
                |_| async { Ok::<_, Error>(json!("dune")) },
                &[json!("scifi")],
                &annotation.to_options(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.key.as_deref(), Some("books:scifi"));
        assert_eq!(engine.tags_of("books:scifi").await.unwrap(), vec!["books"]);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!engine.has("books:scifi").await.unwrap());
    }
}

// =============================================================================
// Invalidation and Expiry
// =============================================================================

mod invalidation_tests {
    use super::*;

    #[tokio::test]
    async fn test_tag_invalidation_across_entries() {
        let engine = CacheEngine::in_memory(CacheConfig::new("tags"));
        let by_author = SetOptions::new()
            .with_tag(TagConfig::Data(FieldTag::new(["author"]).with_prefix("author:")));

        engine
            .set("b1", json!({"author": "le guin"}), by_author.clone())
            .await
            .unwrap();
        engine
            .set("b2", json!({"author": "le guin"}), by_author.clone())
            .await
            .unwrap();
        engine
            .set("b3", json!({"author": "herbert"}), by_author)
            .await
            .unwrap();

        assert_eq!(engine.delete_by_tag("author:le guin").await.unwrap(), 2);
        assert!(!engine.has("b1").await.unwrap());
        assert!(!engine.has("b2").await.unwrap());
        assert!(engine.has("b3").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let engine = CacheEngine::in_memory(
            CacheConfig::new("ttl").with_default_ttl(Duration::from_millis(50)),
        );
        engine.set("k", json!(1), SetOptions::new()).await.unwrap();
        engine
            .set(
                "forever",
                json!(2),
                SetOptions::new().with_ttl(Duration::ZERO),
            )
            .await
            .unwrap();

        assert_eq!(engine.get("k").await.unwrap(), Some(json!(1)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.get("k").await.unwrap(), None);
        assert_eq!(engine.get("forever").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_compressed_store_roundtrip() {
        let store: Arc<dyn CacheStore> =
            Arc::new(cachewise::CompressedStore::new(InMemoryStore::new()));
        let engine = CacheEngine::with_store(
            CacheConfig::new("lz4"),
            store,
            StatisticsConfig::default(),
        );
        let big = json!({"payload": "z".repeat(8192)});
        engine
            .set("big", big.clone(), SetOptions::new().with_tag("large"))
            .await
            .unwrap();

        assert_eq!(engine.get("big").await.unwrap(), Some(big));
        assert!(engine.store().stats().total_bytes < 8192);
        assert_eq!(engine.delete_by_tag("large").await.unwrap(), 1);
    }
}

// =============================================================================
// Store Failures
// =============================================================================

mod failure_tests {
    use super::*;

    fn engine_over(store: Arc<FlakyStore>, strict: bool) -> CacheEngine {
        CacheEngine::with_store(
            CacheConfig::new("flaky").with_throw_on_error(strict),
            store,
            StatisticsConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_lenient_mode_degrades_to_producer() {
        let store = Arc::new(FlakyStore::new());
        store.down.store(true, Ordering::SeqCst);
        let engine = engine_over(store, false);

        let outcome: CacheOutcome = engine
            .exec("k", |_| async { Ok::<_, Error>(json!("fresh")) }, &[], &CacheOptions::new())
            .await
            .unwrap();
        assert!(!outcome.hit);
        assert_eq!(outcome.result, json!("fresh"));

        assert_eq!(engine.get("k").await.unwrap(), None);
        engine.set("k", json!(1), SetOptions::new()).await.unwrap();

        let stats = engine.statistics().current_stats().unwrap();
        assert!(stats.errors >= 3);
    }

    #[tokio::test]
    async fn test_strict_mode_surfaces_store_errors() {
        let store = Arc::new(FlakyStore::new());
        store.down.store(true, Ordering::SeqCst);
        let engine = engine_over(store, true);

        let result: Result<CacheOutcome, Error> = engine
            .exec("k", |_| async { Ok::<_, Error>(json!(1)) }, &[], &CacheOptions::new())
            .await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert!(matches!(engine.get("k").await, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_recovers_after_outage() {
        let store = Arc::new(FlakyStore::new());
        let engine = engine_over(store.clone(), false);

        store.down.store(true, Ordering::SeqCst);
        assert_eq!(engine.delete_by_tag("any").await.unwrap(), 0);

        store.down.store(false, Ordering::SeqCst);
        engine.set("k", json!(1), SetOptions::new()).await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), Some(json!(1)));
    }
}

// =============================================================================
// Statistics
// =============================================================================

mod statistics_tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_statistics_persist_nothing() {
        let engine = CacheEngine::with_store(
            CacheConfig::new("quiet"),
            Arc::new(InMemoryStore::new()),
            StatisticsConfig::disabled(),
        );
        engine.set("k", json!(1), SetOptions::new()).await.unwrap();
        engine.get("k").await.unwrap();
        engine.persist_now().await.unwrap();

        assert!(engine.statistics().current_stats().is_none());
        engine.set_statistics_enabled(true);
        assert!(engine
            .statistics()
            .stats(None, None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_rollup_accumulates_across_persists() {
        let engine = CacheEngine::in_memory(CacheConfig::new("rollup"));
        engine.set("k", json!(1), SetOptions::new()).await.unwrap();

        for _ in 0..3 {
            engine.get("k").await.unwrap();
        }
        engine.persist_now().await.unwrap();
        engine.get("missing").await.unwrap();
        engine.persist_now().await.unwrap();

        let hourly = engine
            .statistics()
            .stats(Some(Period::Hourly), None, None)
            .await
            .unwrap();
        // The two persists may straddle an hour boundary, so sum the rows
        assert!(!hourly.is_empty() && hourly.len() <= 2);
        assert_eq!(hourly.iter().map(|r| r.hits).sum::<u64>(), 3);
        assert_eq!(hourly.iter().map(|r| r.misses).sum::<u64>(), 1);
        assert_eq!(hourly.iter().map(|r| r.sets).sum::<u64>(), 1);
        if hourly.len() == 1 {
            assert!((hourly[0].hit_ratio - 0.75).abs() < 1e-9);
        }
        assert_eq!(hourly[0].gauges.item_count, 1);
    }

    #[tokio::test]
    async fn test_spawned_rollup_persists_periodically() {
        let engine = CacheEngine::with_store(
            CacheConfig::new("periodic"),
            Arc::new(InMemoryStore::new()),
            StatisticsConfig::default().with_persistence_interval(Duration::from_millis(20)),
        );
        engine.set("k", json!(1), SetOptions::new()).await.unwrap();
        engine.get("k").await.unwrap();

        let (task, handle) = engine.spawn_rollup();
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.shutdown();
        handle.await.unwrap();

        let daily = engine
            .statistics()
            .stats(Some(Period::Daily), None, None)
            .await
            .unwrap();
        assert_eq!(daily.iter().map(|r| r.hits).sum::<u64>(), 1);
        assert_eq!(daily.iter().map(|r| r.sets).sum::<u64>(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recording_survives_rollups() {
        const WRITERS: u64 = 8;
        const OPS: u64 = 500;

        let stats = Arc::new(StatisticsEngine::in_memory(
            "contended",
            StatisticsConfig::default(),
        ));
        let done = Arc::new(AtomicBool::new(false));

        let persister = {
            let stats = stats.clone();
            let done = done.clone();
            tokio::spawn(async move {
                while !done.load(Ordering::SeqCst) {
                    stats.persist(Gauges::default()).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let stats = stats.clone();
                tokio::spawn(async move {
                    let key = format!("key:{}", w % 3);
                    for i in 0..OPS {
                        let latency = Duration::from_micros(i);
                        if i % 4 == 0 {
                            stats.record_miss(latency, Some(&key), None);
                        } else {
                            stats.record_hit(latency, Some(&key), None);
                        }
                        if i % 50 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.await.unwrap();
        }
        done.store(true, Ordering::SeqCst);
        persister.await.unwrap();

        // Every sample is either persisted or still live, never both
        let hourly = stats.stats(Some(Period::Hourly), None, None).await.unwrap();
        let live = stats.current_stats().unwrap();
        let hits = hourly.iter().map(|r| r.hits).sum::<u64>() + live.hits;
        let misses = hourly.iter().map(|r| r.misses).sum::<u64>() + live.misses;
        assert_eq!(misses, WRITERS * OPS / 4);
        assert_eq!(hits + misses, WRITERS * OPS);

        let persisted_keys: u64 = stats
            .persisted_key_access(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.total)
            .sum();
        let live_keys: u64 = stats.top_accessed_keys(10).iter().map(|k| k.total).sum();
        assert_eq!(persisted_keys + live_keys, WRITERS * OPS);
    }
}
