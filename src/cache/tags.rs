//! Tag Resolution
//!
//! Derives invalidation tags for a cached result. A tag config is one of:
//!
//! - a static value (`"books"` or `{"value": "books"}`)
//! - a template (`{"template": "tenant:{tenant}"}`), same grammar as keys
//! - result fields (`{"data": "ID", "prefix": "book:"}`), taken from every
//!   item when the result is an array
//! - call parameters (`{"param": ["kind", "id"], "separator": "-"}`)
//!
//! Configs that produce no value are skipped; output is the de-duplicated
//! union in first-seen order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::{render_value, substitute, CallContext, KeyInputs};

/// Default joiner for multi-field tags
pub const DEFAULT_TAG_SEPARATOR: &str = ":";

// =============================================================================
// Configuration
// =============================================================================

/// Field-derived tag settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTag {
    /// Field names or dotted paths; array elements are addressed by index
    pub fields: Vec<String>,
    pub separator: String,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl FieldTag {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            separator: DEFAULT_TAG_SEPARATOR.to_string(),
            prefix: None,
            suffix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Build the tag for one item, `None` when any field is missing or falsy
    fn render(&self, item: &Value) -> Option<String> {
        if self.fields.is_empty() {
            return None;
        }

        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = lookup(item, field).filter(|v| !is_falsy(v))?;
            parts.push(render_value(value));
        }

        Some(format!(
            "{}{}{}",
            self.prefix.as_deref().unwrap_or(""),
            parts.join(&self.separator),
            self.suffix.as_deref().unwrap_or("")
        ))
    }
}

/// One tag rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTagConfig", into = "RawTagConfig")]
pub enum TagConfig {
    Static(String),
    Template(String),
    Data(FieldTag),
    Param(FieldTag),
}

impl From<&str> for TagConfig {
    fn from(value: &str) -> Self {
        TagConfig::Static(value.to_string())
    }
}

/// Wire shape of a tag config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawTagConfig {
    Plain(String),
    Value {
        value: String,
    },
    Template {
        template: String,
    },
    Data {
        data: OneOrMany,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        separator: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suffix: Option<String>,
    },
    Param {
        param: OneOrMany,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        separator: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suffix: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(v: OneOrMany) -> Self {
        match v {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

fn field_tag(
    fields: OneOrMany,
    separator: Option<String>,
    prefix: Option<String>,
    suffix: Option<String>,
) -> FieldTag {
    FieldTag {
        fields: fields.into(),
        separator: separator.unwrap_or_else(|| DEFAULT_TAG_SEPARATOR.to_string()),
        prefix,
        suffix,
    }
}

impl From<RawTagConfig> for TagConfig {
    fn from(raw: RawTagConfig) -> Self {
        match raw {
            RawTagConfig::Plain(value) | RawTagConfig::Value { value } => TagConfig::Static(value),
            RawTagConfig::Template { template } => TagConfig::Template(template),
            RawTagConfig::Data {
                data,
                separator,
                prefix,
                suffix,
            } => TagConfig::Data(field_tag(data, separator, prefix, suffix)),
            RawTagConfig::Param {
                param,
                separator,
                prefix,
                suffix,
            } => TagConfig::Param(field_tag(param, separator, prefix, suffix)),
        }
    }
}

impl From<TagConfig> for RawTagConfig {
    fn from(config: TagConfig) -> Self {
        let separator = |s: String| (s != DEFAULT_TAG_SEPARATOR).then_some(s);
        match config {
            TagConfig::Static(value) => RawTagConfig::Plain(value),
            TagConfig::Template(template) => RawTagConfig::Template { template },
            TagConfig::Data(f) => RawTagConfig::Data {
                data: OneOrMany::Many(f.fields),
                separator: separator(f.separator),
                prefix: f.prefix,
                suffix: f.suffix,
            },
            TagConfig::Param(f) => RawTagConfig::Param {
                param: OneOrMany::Many(f.fields),
                separator: separator(f.separator),
                prefix: f.prefix,
                suffix: f.suffix,
            },
        }
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves tag configs against a result and call parameters
#[derive(Debug, Clone, Default)]
pub struct TagResolver;

impl TagResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve_tags(
        &self,
        configs: &[TagConfig],
        result: &Value,
        params: Option<&Value>,
        context: &CallContext,
    ) -> Vec<String> {
        let mut tags = Vec::new();
        if configs.is_empty() {
            return tags;
        }

        let mut seen = HashSet::new();
        let mut push = |tag: String| {
            if !tag.is_empty() && seen.insert(tag.clone()) {
                tags.push(tag);
            }
        };

        for config in configs {
            match config {
                TagConfig::Static(value) => push(value.clone()),
                TagConfig::Template(template) => {
                    let inputs = KeyInputs {
                        data: Some(result.clone()),
                        params: params.cloned(),
                        ..Default::default()
                    };
                    push(substitute(template, context, &inputs));
                }
                TagConfig::Data(field) => match result {
                    Value::Array(items) => {
                        for item in items {
                            if let Some(tag) = field.render(item) {
                                push(tag);
                            }
                        }
                    }
                    single => {
                        if let Some(tag) = field.render(single) {
                            push(tag);
                        }
                    }
                },
                TagConfig::Param(field) => {
                    if let Some(tag) = params.and_then(|p| field.render(p)) {
                        push(tag);
                    }
                }
            }
        }

        tags
    }
}

/// Follow a dotted path through objects and arrays
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(_) | Value::Object(_) => false,
    }
}

// =============================================================================
// Tests
// =============================================================================
