//! Per-call cache options
//!
//! [`CacheAnnotation`] is the declarative form (loaded from JSON or YAML
//! alongside an entity or operation); [`CacheOptions`] is what the engine
//! consumes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::{CallContext, KeyTemplate};
use super::tags::TagConfig;
use crate::error::Result;

/// Options for read-through calls (`wrap`, `exec`, `run`)
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// `None` falls back to the engine default
    pub ttl: Option<Duration>,
    pub key: Option<KeyTemplate>,
    pub tags: Vec<TagConfig>,
    /// Parameters exposed to `param` tag rules; positional args when unset
    pub params: Option<Value>,
    pub context: CallContext,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_key(mut self, key: KeyTemplate) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<TagConfig>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = TagConfig>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

/// Options for a direct `set`
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<TagConfig>,
    pub params: Option<Value>,
    pub context: CallContext,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<TagConfig>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

impl From<&CacheOptions> for SetOptions {
    fn from(options: &CacheOptions) -> Self {
        Self {
            ttl: options.ttl,
            tags: options.tags.clone(),
            params: options.params.clone(),
            context: options.context.clone(),
        }
    }
}

/// Declarative cache settings
///
/// ```yaml
/// ttl: 60000
/// key:
///   template: "books:{tenant}:{hash}"
/// tags:
///   - books
///   - data: ID
///     prefix: "book:"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheAnnotation {
    /// Milliseconds; zero or absent means the engine default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyTemplate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagConfig>,
}

impl CacheAnnotation {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self
                .ttl
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            key: self.key.clone(),
            tags: self.tags.clone(),
            ..Default::default()
        }
    }
}

impl From<CacheAnnotation> for CacheOptions {
    fn from(annotation: CacheAnnotation) -> Self {
        annotation.to_options()
    }
}

// =============================================================================
// Tests
// =============================================================================
