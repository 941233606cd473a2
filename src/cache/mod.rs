//! Read-Through Cache
//!
//! Key derivation, tag resolution and the engine that wraps producers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       CacheEngine                        │
//! │  ┌─────────────┐   ┌─────────────┐   ┌────────────────┐  │
//! │  │ KeyManager  │   │ TagResolver │   │ StatisticsEng. │  │
//! │  └──────┬──────┘   └──────┬──────┘   └───────▲────────┘  │
//! │         │ key             │ tags             │ hit/miss  │
//! │         ▼                 ▼                  │           │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │        CacheEntry { value, tags, timestamp }        │  │
//! │  └──────────────────────────┬─────────────────────────┘  │
//! └─────────────────────────────┼────────────────────────────┘
//!                               ▼
//!                      Arc<dyn CacheStore>
//! ```

pub mod engine;
pub mod entry;
pub mod key;
pub mod options;
pub mod read_through;
pub mod tags;

mod proptest;

pub use engine::{CacheConfig, CacheEngine, EngineConfiguration};
pub use entry::{CacheEntry, CacheOutcome, CACHE_KEY_HEADER};
pub use key::{
    canonical_json, canonicalize, content_hash, CallContext, KeyInputs, KeyManager, KeySubject,
    KeyTemplate, QueryContext, QueryKind, RequestContext,
};
pub use options::{CacheAnnotation, CacheOptions, SetOptions};
pub use read_through::Wrapped;
pub use tags::{FieldTag, TagConfig, TagResolver, DEFAULT_TAG_SEPARATOR};
