//! Property-Based Tests for Key and Tag Resolution
//!
//! # Test Properties
//!
//! 1. **Determinism**: equal subject, context and template give equal keys
//! 2. **Order independence**: the content hash ignores object key order
//! 3. **Template isolation**: distinct tenants never share a `{tenant}` key
//! 4. **Tag uniqueness**: resolved tags contain no duplicates
//! 5. **Idempotent reads**: a second read-through call is a hit with the same
//!    result

#![cfg(test)]

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use super::engine::{CacheConfig, CacheEngine};
use super::entry::CacheOutcome;
use super::key::{content_hash, CallContext, KeyManager, KeySubject, KeyTemplate, QueryContext};
use super::options::CacheOptions;
use super::tags::{FieldTag, TagConfig, TagResolver};
use crate::error::Error;

// =============================================================================
// Property Strategies
// =============================================================================

fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

fn object_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::vec(("[a-z]{1,6}", leaf_strategy()), 0..8).prop_map(|mut pairs| {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs.dedup_by(|a, b| a.0 == b.0);
        pairs
    })
}

fn to_object(pairs: impl IntoIterator<Item = (String, Value)>) -> Value {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert(k, v);
    }
    Value::Object(map)
}

fn tenant_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,10}"
}

// =============================================================================
// Key Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_key_resolution_deterministic(pairs in object_strategy(), tenant in tenant_strategy()) {
        let km = KeyManager::new();
        let subject = KeySubject::Query(QueryContext::select(to_object(pairs)));
        let ctx = CallContext::new().with_tenant(tenant);
        let template = KeyTemplate::template("{tenant}:{hash}");

        let a = km.resolve_key(&subject, &ctx, Some(&template));
        let b = km.resolve_key(&subject, &ctx, Some(&template));
        prop_assert!(a.is_some());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_hash_ignores_key_order(pairs in object_strategy()) {
        let forward = to_object(pairs.clone());
        let reversed = to_object(pairs.into_iter().rev());

        prop_assert_eq!(
            content_hash(Some(&forward), None, None),
            content_hash(Some(&reversed), None, None)
        );
        prop_assert_eq!(content_hash(Some(&forward), None, None).len(), 32);
    }

    #[test]
    fn prop_tenants_isolated(a in tenant_strategy(), b in tenant_strategy(), pairs in object_strategy()) {
        prop_assume!(a != b);
        let km = KeyManager::new();
        let subject = KeySubject::Data(to_object(pairs));
        let template = KeyTemplate::template("{tenant}:{hash}");

        let key_a = km.resolve_key(&subject, &CallContext::new().with_tenant(a), Some(&template));
        let key_b = km.resolve_key(&subject, &CallContext::new().with_tenant(b), Some(&template));
        prop_assert_ne!(key_a, key_b);
    }

    #[test]
    fn prop_call_keys_distinct_per_args(x in any::<i32>(), y in any::<i32>()) {
        prop_assume!(x != y);
        let km = KeyManager::new();
        let ctx = CallContext::new();
        prop_assert_ne!(
            km.resolve_call_key("user", &[json!(x)], &ctx, None),
            km.resolve_call_key("user", &[json!(y)], &ctx, None)
        );
    }
}

// =============================================================================
// Tag Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_tags_unique(values in prop::collection::vec("[a-c]{0,2}", 0..30)) {
        let result = Value::Array(values.iter().map(|v| json!({"t": v})).collect());
        let configs = vec![
            TagConfig::from("static"),
            TagConfig::Data(FieldTag::new(["t"])),
            TagConfig::from("static"),
        ];
        let tags = TagResolver::new().resolve_tags(&configs, &result, None, &CallContext::new());

        let unique: HashSet<&String> = tags.iter().collect();
        prop_assert_eq!(unique.len(), tags.len());
        prop_assert!(tags.iter().all(|t| !t.is_empty()));
        prop_assert_eq!(tags.first().map(String::as_str), Some("static"));
    }
}

// =============================================================================
// Read-Through Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_second_call_hits(id in any::<u32>(), payload in leaf_strategy()) {
        let engine = Arc::new(CacheEngine::in_memory(CacheConfig::new("prop")));
        let wrapped = engine.wrap(
            "item:{args[0]}",
            move |_args: Vec<Value>| {
                let payload = payload.clone();
                async move { Ok::<_, Error>(payload) }
            },
            CacheOptions::new(),
        );

        let (first, second): (CacheOutcome, CacheOutcome) = tokio_test::block_on(async {
            let first = wrapped.call(&[json!(id)]).await.unwrap();
            let second = wrapped.call(&[json!(id)]).await.unwrap();
            (first, second)
        });

        prop_assert!(!first.hit);
        prop_assert!(second.hit);
        prop_assert_eq!(first.result, second.result);
        prop_assert_eq!(first.key, Some(format!("item:{}", id)));
    }
}
