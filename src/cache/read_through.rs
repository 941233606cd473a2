//! Read-Through Surface
//!
//! Every entry point funnels into the same sequence:
//!
//! ```text
//!   start timer
//!   has(key) ──yes──► get ──► record hit ──► CacheOutcome { hit: true }
//!      │
//!      no
//!      ▼
//!   producer() ──► record miss (total time) ──► resolve tags
//!      ──► store with TTL ──► CacheOutcome { hit: false }
//! ```
//!
//! Producer errors are returned untouched. Store failures degrade to a miss
//! unless the engine runs with `throw_on_error`, in which case they surface
//! through `E: From<Error>`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::engine::CacheEngine;
use super::entry::{CacheEntry, CacheOutcome};
use super::key::KeySubject;
use super::options::CacheOptions;
use crate::error::{Error, Result};

/// A producer bound to a key base and options, see [`CacheEngine::wrap`]
pub struct Wrapped<F> {
    engine: Arc<CacheEngine>,
    base: String,
    producer: F,
    options: CacheOptions,
}

impl<F> Wrapped<F> {
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Invoke through the cache with positional `args`
    pub async fn call<Fut, T, E>(&self, args: &[Value]) -> std::result::Result<CacheOutcome<T>, E>
    where
        F: Fn(Vec<Value>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<Error>,
    {
        self.engine
            .exec(&self.base, |a| (self.producer)(a), args, &self.options)
            .await
    }
}

impl CacheEngine {
    /// Bind `producer` to a key base for repeated calls.
    ///
    /// `base` is a template when it contains `{`; otherwise each call's key is
    /// `base:{args[0]}:{args[1]}...`.
    pub fn wrap<F>(self: &Arc<Self>, base: impl Into<String>, producer: F, options: CacheOptions) -> Wrapped<F> {
        Wrapped {
            engine: Arc::clone(self),
            base: base.into(),
            producer,
            options,
        }
    }

    /// Run `producer` through the cache once, keyed by `key` and `args`
    #[instrument(skip(self, producer, args, options), fields(cache = %self.config.name))]
    pub async fn exec<F, Fut, T, E>(
        &self,
        key: &str,
        producer: F,
        args: &[Value],
        options: &CacheOptions,
    ) -> std::result::Result<CacheOutcome<T>, E>
    where
        F: FnOnce(Vec<Value>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<Error>,
    {
        let owned = args.to_vec();
        if !self.is_enabled() {
            return bypass(Instant::now(), producer(owned)).await;
        }

        let key = self
            .keys
            .resolve_call_key(key, args, &options.context, options.key.as_ref());
        let params = options
            .params
            .clone()
            .unwrap_or_else(|| Value::Array(args.to_vec()));

        self.read_through(key, options, Some(params), || producer(owned))
            .await
    }

    /// Run `next` through the cache when `subject` is a read; mutations and
    /// a disabled engine call `next` directly
    #[instrument(skip(self, subject, next, options), fields(cache = %self.config.name))]
    pub async fn run<F, Fut, T, E>(
        &self,
        subject: &KeySubject,
        next: F,
        options: &CacheOptions,
    ) -> std::result::Result<CacheOutcome<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<Error>,
    {
        if !self.is_enabled() {
            return bypass(Instant::now(), next()).await;
        }

        let Some(key) = self
            .keys
            .resolve_key(subject, &options.context, options.key.as_ref())
        else {
            debug!("Not a read, bypassing cache");
            return bypass(Instant::now(), next()).await;
        };

        let params = options.params.clone().or_else(|| match subject {
            KeySubject::Request(req) => req.params.clone(),
            _ => None,
        });

        self.read_through(key, options, params, next).await
    }

    async fn read_through<F, Fut, T, E>(
        &self,
        key: String,
        options: &CacheOptions,
        params: Option<Value>,
        producer: F,
    ) -> std::result::Result<CacheOutcome<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<Error>,
    {
        let start = Instant::now();

        match self.lookup(&key).await {
            Ok(Some(entry)) => match serde_json::from_value::<T>(entry.value) {
                Ok(result) => {
                    let latency = start.elapsed();
                    self.stats.record_hit(latency, Some(&key), None);
                    debug!(key = %key, "Cache hit");
                    return Ok(CacheOutcome {
                        result,
                        key: Some(key),
                        hit: true,
                        latency,
                    });
                }
                Err(e) => self.degrade(e.into(), &key, start)?,
            },
            Ok(None) => {}
            Err(e) => self.degrade(e, &key, start)?,
        }

        let result = producer().await?;
        let latency = start.elapsed();
        self.stats.record_miss(latency, Some(&key), None);
        debug!(key = %key, "Cache miss");

        let write_start = Instant::now();
        if let Err(e) = self.store_result(&key, &result, options, params.as_ref()).await {
            self.degrade(e, &key, write_start)?;
        }

        Ok(CacheOutcome {
            result,
            key: Some(key),
            hit: false,
            latency,
        })
    }

    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        if !self.store.has(key).await? {
            return Ok(None);
        }
        // May have expired between the two calls
        self.read_entry(key).await
    }

    async fn store_result<T: Serialize>(
        &self,
        key: &str,
        result: &T,
        options: &CacheOptions,
        params: Option<&Value>,
    ) -> Result<()> {
        let value = serde_json::to_value(result)?;
        let tags = self
            .tags
            .resolve_tags(&options.tags, &value, params, &options.context);
        let ttl = options.ttl.or(self.config.default_ttl);
        self.write_entry(key, value, tags, ttl).await
    }
}

async fn bypass<Fut, T, E>(start: Instant, fut: Fut) -> std::result::Result<CacheOutcome<T>, E>
where
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let result = fut.await?;
    Ok(CacheOutcome {
        result,
        key: None,
        hit: false,
        latency: start.elapsed(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::engine::CacheConfig;
    use crate::cache::key::{CallContext, KeyTemplate, QueryContext, QueryKind, RequestContext};
    use crate::cache::tags::{FieldTag, TagConfig};
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    enum AppError {
        NotFound,
        Cache(String),
    }

    impl From<Error> for AppError {
        fn from(e: Error) -> Self {
            AppError::Cache(e.to_string())
        }
    }

    fn engine() -> Arc<CacheEngine> {
        Arc::new(CacheEngine::in_memory(CacheConfig::new("rt")))
    }

    #[tokio::test]
    async fn test_wrap_miss_then_hit() {
        let engine = engine();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let load_user = engine.wrap(
            "user:{args[0]}",
            move |args: Vec<Value>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, AppError>(json!({"id": args[0], "name": "Ada"}))
                }
            },
            CacheOptions::new(),
        );

        let first: CacheOutcome = load_user.call(&[json!(42)]).await.unwrap();
        assert!(!first.hit);
        assert_eq!(first.key.as_deref(), Some("user:42"));

        let second: CacheOutcome = load_user.call(&[json!(42)]).await.unwrap();
        assert!(second.hit);
        assert_eq!(second.result, first.result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrap_plain_base_appends_args() {
        let engine = engine();
        let wrapped = engine.wrap(
            "orders",
            |args: Vec<Value>| async move { Ok::<_, AppError>(json!(args.len())) },
            CacheOptions::new(),
        );
        let outcome: CacheOutcome = wrapped.call(&[json!("eu"), json!(7)]).await.unwrap();
        assert_eq!(outcome.key.as_deref(), Some("orders:eu:7"));
    }

    #[tokio::test]
    async fn test_producer_error_propagates_unmodified() {
        let engine = engine();
        let result: std::result::Result<CacheOutcome<Value>, AppError> = engine
            .exec(
                "missing",
                |_| async { Err(AppError::NotFound) },
                &[json!(1)],
                &CacheOptions::new(),
            )
            .await;
        assert_matches!(result, Err(AppError::NotFound));
        assert!(!engine.has("missing:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_exec_stores_tags_and_ttl() {
        let engine = engine();
        let options = CacheOptions::new()
            .with_ttl(std::time::Duration::from_secs(30))
            .with_tag(TagConfig::Data(FieldTag::new(["ID"]).with_prefix("book:")))
            .with_tag(TagConfig::Param(FieldTag::new(["0"]).with_prefix("shelf:")));

        let outcome: CacheOutcome = engine
            .exec(
                "shelf",
                |_| async { Ok::<_, AppError>(json!([{"ID": 1}, {"ID": 2}])) },
                &[json!("scifi")],
                &options,
            )
            .await
            .unwrap();

        assert_eq!(outcome.key.as_deref(), Some("shelf:scifi"));
        assert_eq!(
            engine.tags_of("shelf:scifi").await.unwrap(),
            vec!["book:1", "book:2", "shelf:scifi"]
        );
    }

    #[tokio::test]
    async fn test_run_bypasses_mutations() {
        let engine = engine();
        let subject = KeySubject::Request(RequestContext::new("CREATE").with_data(json!({"a": 1})));

        let outcome: CacheOutcome = engine
            .run(&subject, || async { Ok::<_, AppError>(json!("created")) }, &CacheOptions::new())
            .await
            .unwrap();
        assert_eq!(outcome.key, None);
        assert!(!outcome.hit);
        assert!(engine.store().iterate().await.unwrap().is_empty());

        let update = KeySubject::Query(QueryContext::new(QueryKind::Update, json!({"set": 1})));
        let outcome: CacheOutcome = engine
            .run(&update, || async { Ok::<_, AppError>(json!(1)) }, &CacheOptions::new())
            .await
            .unwrap();
        assert_eq!(outcome.header(), None);
    }

    #[tokio::test]
    async fn test_run_caches_reads_per_tenant() {
        let engine = engine();
        let subject = KeySubject::Query(QueryContext::select(json!({"from": "Books"})));
        let options = |tenant: &str| {
            CacheOptions::new()
                .with_key(KeyTemplate::template("{tenant}:{hash}"))
                .with_context(CallContext::new().with_tenant(tenant))
        };

        let a: CacheOutcome = engine
            .run(&subject, || async { Ok::<_, AppError>(json!("a")) }, &options("t1"))
            .await
            .unwrap();
        let b: CacheOutcome = engine
            .run(&subject, || async { Ok::<_, AppError>(json!("b")) }, &options("t2"))
            .await
            .unwrap();
        let a_again: CacheOutcome = engine
            .run(&subject, || async { Ok::<_, AppError>(json!("x")) }, &options("t1"))
            .await
            .unwrap();

        assert_ne!(a.key, b.key);
        assert!(a.key.as_deref().unwrap().starts_with("t1:"));
        assert!(a_again.hit);
        assert_eq!(a_again.result, json!("a"));
    }

    #[tokio::test]
    async fn test_disabled_engine_passes_through() {
        let engine = Arc::new(CacheEngine::in_memory(
            CacheConfig::new("off").with_enabled(false),
        ));
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let outcome: CacheOutcome = engine
                .exec(
                    "k",
                    |_| {
                        let calls = &calls;
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, AppError>(json!(1))
                        }
                    },
                    &[],
                    &CacheOptions::new(),
                )
                .await
                .unwrap();
            assert!(!outcome.hit);
            assert_eq!(outcome.key, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.statistics().current_stats().unwrap().total_requests, 0);
    }

    #[tokio::test]
    async fn test_typed_outcome() {
        #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
        struct User {
            id: u64,
        }

        let engine = engine();
        let wrapped = engine.wrap(
            "typed",
            |args: Vec<Value>| async move {
                Ok::<_, AppError>(User {
                    id: args[0].as_u64().unwrap_or_default(),
                })
            },
            CacheOptions::new(),
        );

        let first: CacheOutcome<User> = wrapped.call(&[json!(5)]).await.unwrap();
        let second: CacheOutcome<User> = wrapped.call(&[json!(5)]).await.unwrap();
        assert_eq!(first.result, User { id: 5 });
        assert!(second.hit);
        assert_eq!(second.result, User { id: 5 });
    }
}
