//! Cache Key Construction
//!
//! Deterministic string keys from templates, call context and content
//! hashes. Resolution is a pure function of its inputs: the same subject,
//! context and template always produce the same key.
//!
//! # Template grammar
//!
//! | Placeholder | Replaced with |
//! |---|---|
//! | `{tenant}` / `{user}` / `{locale}` | fields of [`CallContext`] (empty when unset) |
//! | `{hash}` | 128-bit hex digest of canonical `{data, params, query}` |
//! | `{args[i]}` | i-th positional call argument |
//!
//! Unknown or unterminated placeholders are kept verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Bytes of the SHA-256 digest kept for `{hash}` (128 bits)
const HASH_BYTES: usize = 16;

// =============================================================================
// Inputs
// =============================================================================

/// Caller identity threaded explicitly through key and tag resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub tenant: Option<String>,
    pub user: Option<String>,
    pub locale: Option<String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }
}

/// Key template as supplied by the annotation collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyTemplate {
    /// Explicit key, wins over everything else
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Placeholder template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl KeyTemplate {
    /// Template with an explicit key
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Template with placeholder substitution
    pub fn template(template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
            ..Default::default()
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
}

/// Request-shaped subject (HTTP verb or framework event plus payload)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    /// Verb or event name, e.g. `GET` or `READ`
    pub event: String,
    pub data: Option<Value>,
    pub params: Option<Value>,
    pub query: Option<Value>,
    /// Key computed earlier for the same request
    pub cache_key: Option<String>,
}

impl RequestContext {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    /// Only reads are cacheable
    pub fn is_read(&self) -> bool {
        matches!(
            self.event.to_ascii_uppercase().as_str(),
            "READ" | "GET" | "HEAD"
        )
    }
}

/// Kind of a query statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Select,
    Insert,
    Upsert,
    Update,
    Delete,
}

/// Query-shaped subject
#[derive(Debug, Clone, PartialEq)]
pub struct QueryContext {
    pub kind: QueryKind,
    /// Serialized query body, hashed for `{hash}`
    pub query: Value,
    pub cache_key: Option<String>,
}

impl QueryContext {
    pub fn new(kind: QueryKind, query: Value) -> Self {
        Self {
            kind,
            query,
            cache_key: None,
        }
    }

    pub fn select(query: Value) -> Self {
        Self::new(QueryKind::Select, query)
    }

    pub fn is_read(&self) -> bool {
        self.kind == QueryKind::Select
    }
}

/// What a key is derived from
#[derive(Debug, Clone, PartialEq)]
pub enum KeySubject {
    /// Used verbatim
    Key(String),
    Request(RequestContext),
    Query(QueryContext),
    /// Plain data hashed as `data`
    Data(Value),
}

impl KeySubject {
    /// False for mutating requests and queries
    pub fn is_read(&self) -> bool {
        match self {
            KeySubject::Request(req) => req.is_read(),
            KeySubject::Query(q) => q.is_read(),
            KeySubject::Key(_) | KeySubject::Data(_) => true,
        }
    }
}

impl From<&str> for KeySubject {
    fn from(key: &str) -> Self {
        KeySubject::Key(key.to_string())
    }
}

impl From<String> for KeySubject {
    fn from(key: String) -> Self {
        KeySubject::Key(key)
    }
}

/// Values available to template substitution
#[derive(Debug, Clone, Default)]
pub struct KeyInputs {
    pub data: Option<Value>,
    pub params: Option<Value>,
    pub query: Option<Value>,
    pub args: Vec<Value>,
}

impl KeyInputs {
    /// Inputs for a positional function call; the arguments double as `params`
    pub fn from_args(args: &[Value]) -> Self {
        Self {
            params: Some(Value::Array(args.to_vec())),
            args: args.to_vec(),
            ..Default::default()
        }
    }

    /// Content hash over `{data, params, query}`
    pub fn hash(&self) -> String {
        content_hash(
            self.data.as_ref(),
            self.params.as_ref(),
            self.query.as_ref(),
        )
    }
}

// =============================================================================
// Hashing
// =============================================================================

/// Copy of `value` with every object's keys inserted in sorted order
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Stable JSON text for `value`
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// 128-bit hex digest of the canonical serialization of `(data, params, query)`
pub fn content_hash(data: Option<&Value>, params: Option<&Value>, query: Option<&Value>) -> String {
    let mut envelope = Map::new();
    envelope.insert("data".into(), data.cloned().unwrap_or(Value::Null));
    envelope.insert("params".into(), params.cloned().unwrap_or(Value::Null));
    envelope.insert("query".into(), query.cloned().unwrap_or(Value::Null));

    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&Value::Object(envelope)).as_bytes());
    hex::encode(&hasher.finalize()[..HASH_BYTES])
}

/// Render a value for use inside a key
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => canonical_json(other),
    }
}

/// Render a positional argument. Strings stay bare unless they contain the
/// `:` separator, start with a quote, or read as a non-string JSON literal;
/// those are emitted quoted so `["a:b"]` and `["a", "b"]`, or `"42"` and
/// `42`, never share a key.
pub(crate) fn render_arg(value: &Value) -> String {
    match value {
        Value::String(s) if !needs_quoting(s) => s.clone(),
        other => canonical_json(other),
    }
}

fn needs_quoting(s: &str) -> bool {
    s.contains(':')
        || s.starts_with('"')
        || serde_json::from_str::<Value>(s).map_or(false, |v| !v.is_string())
}

// =============================================================================
// Key Manager
// =============================================================================

/// Resolves cache keys
#[derive(Debug, Clone, Default)]
pub struct KeyManager;

impl KeyManager {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the key for a subject.
    ///
    /// `None` means "do not cache" (mutating request or query).
    pub fn resolve_key(
        &self,
        subject: &KeySubject,
        context: &CallContext,
        template: Option<&KeyTemplate>,
    ) -> Option<String> {
        let inputs = match subject {
            KeySubject::Key(key) => return Some(key.clone()),
            KeySubject::Request(req) => {
                if let Some(key) = &req.cache_key {
                    return Some(key.clone());
                }
                if !req.is_read() {
                    return None;
                }
                KeyInputs {
                    data: req.data.clone(),
                    params: req.params.clone(),
                    query: req.query.clone(),
                    args: Vec::new(),
                }
            }
            KeySubject::Query(q) => {
                if let Some(key) = &q.cache_key {
                    return Some(key.clone());
                }
                if !q.is_read() {
                    return None;
                }
                KeyInputs {
                    query: Some(q.query.clone()),
                    ..Default::default()
                }
            }
            KeySubject::Data(data) => KeyInputs {
                data: Some(data.clone()),
                ..Default::default()
            },
        };

        Some(self.resolve_template(template, context, &inputs))
    }

    /// Key for a positional call, as used by `wrap` and `exec`.
    ///
    /// An explicit `template` wins. Otherwise `base` is treated as a template
    /// when it contains a placeholder, or extended with one `{args[i]}`
    /// segment per argument.
    pub fn resolve_call_key(
        &self,
        base: &str,
        args: &[Value],
        context: &CallContext,
        template: Option<&KeyTemplate>,
    ) -> String {
        let inputs = KeyInputs::from_args(args);

        if let Some(template) = template {
            return self.resolve_template(Some(template), context, &inputs);
        }

        let generated = if base.contains('{') {
            base.to_string()
        } else {
            let mut t = base.to_string();
            for i in 0..args.len() {
                t.push_str(&format!(":{{args[{}]}}", i));
            }
            t
        };

        self.resolve_template(Some(&KeyTemplate::template(generated)), context, &inputs)
    }

    /// Apply the precedence `value` > `template` > content hash, then wrap
    /// with prefix and suffix.
    pub fn resolve_template(
        &self,
        template: Option<&KeyTemplate>,
        context: &CallContext,
        inputs: &KeyInputs,
    ) -> String {
        let explicit = template
            .and_then(|t| t.value.as_deref())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let core = explicit
            .or_else(|| {
                template
                    .and_then(|t| t.template.as_deref())
                    .map(|t| substitute(t, context, inputs))
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| inputs.hash());

        let prefix = template.and_then(|t| t.prefix.as_deref()).unwrap_or("");
        let suffix = template.and_then(|t| t.suffix.as_deref()).unwrap_or("");
        format!("{}{}{}", prefix, core, suffix)
    }
}

/// Replace placeholders in `template`
pub(crate) fn substitute(template: &str, context: &CallContext, inputs: &KeyInputs) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut hash: Option<String> = None;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let name = &after[..close];
        match name {
            "tenant" => out.push_str(context.tenant.as_deref().unwrap_or("")),
            "user" => out.push_str(context.user.as_deref().unwrap_or("")),
            "locale" => out.push_str(context.locale.as_deref().unwrap_or("")),
            "hash" => out.push_str(hash.get_or_insert_with(|| inputs.hash())),
            _ => match arg_index(name) {
                Some(i) => {
                    if let Some(arg) = inputs.args.get(i) {
                        out.push_str(&render_arg(arg));
                    }
                }
                None => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
            },
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Parse `args[N]`
fn arg_index(name: &str) -> Option<usize> {
    name.strip_prefix("args[")?.strip_suffix(']')?.parse().ok()
}

// =============================================================================
// Tests
// =============================================================================
