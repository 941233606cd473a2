//! Cachewise workload runner
//!
//! Drives a synthetic read-through workload against an in-memory store and
//! prints the resulting statistics as JSON.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │   Workload   │────▶│ CacheEngine  │────▶│ InMemoryStore    │
//! │  (requests)  │     │ (wrap/call)  │     │ (opt. LZ4)       │
//! └──────────────┘     └──────┬───────┘     └──────────────────┘
//!                             ▼
//!                      StatisticsEngine ──▶ JSON report
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cachewise::cache::{EngineConfiguration, FieldTag};
use cachewise::stats::{KeyAccessRecord, KeyStats};
use cachewise::{
    AggregateRecord, CacheAnnotation, CacheConfig, CacheEngine, CacheOptions, CacheOutcome,
    CacheStatistics, CacheStore, CompressedStore, Error, InMemoryStore, Period, Result,
    StatisticsConfig, TagConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Cachewise - read-through cache workload runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache name used for statistics
    #[arg(long, env = "CACHE_NAME", default_value = "workload")]
    name: String,

    /// Number of read-through calls to issue
    #[arg(long, env = "CACHE_REQUESTS", default_value = "1000")]
    requests: u64,

    /// Number of distinct keys requested
    #[arg(long, env = "CACHE_KEYS", default_value = "50")]
    keys: u64,

    /// Simulated producer latency in milliseconds
    #[arg(long, env = "CACHE_PRODUCER_DELAY_MS", default_value = "2")]
    producer_delay_ms: u64,

    /// Entry TTL in milliseconds (0 = no expiry)
    #[arg(long, env = "CACHE_TTL_MS", default_value = "0")]
    ttl_ms: u64,

    /// Wrap the store with LZ4 compression
    #[arg(long, env = "CACHE_COMPRESS")]
    compress: bool,

    /// YAML cache annotation (ttl, key, tags) overriding --ttl-ms
    #[arg(long, env = "CACHE_ANNOTATION")]
    annotation: Option<PathBuf>,

    /// Samples kept per latency buffer
    #[arg(long, env = "CACHE_MAX_LATENCIES", default_value = "1000")]
    max_latencies: usize,

    /// Number of top keys to report
    #[arg(long, env = "CACHE_TOP_KEYS", default_value = "10")]
    top: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// Printed on completion
#[derive(Debug, Serialize)]
struct Report {
    configuration: EngineConfiguration,
    calls: u64,
    observed_hits: u64,
    current: Option<CacheStatistics>,
    top_keys: Vec<KeyStats>,
    persisted: Vec<AggregateRecord>,
    persisted_keys: Vec<KeyAccessRecord>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    if args.keys == 0 {
        return Err(Error::Config("--keys must be at least 1".into()));
    }

    info!("Starting cachewise workload");
    info!("  Requests: {}", args.requests);
    info!("  Distinct keys: {}", args.keys);
    info!("  Producer delay: {} ms", args.producer_delay_ms);
    info!("  Compression: {}", args.compress);

    let options = load_options(&args).await?;

    let store: Arc<dyn CacheStore> = if args.compress {
        Arc::new(CompressedStore::new(InMemoryStore::new()))
    } else {
        Arc::new(InMemoryStore::new())
    };

    let stats_config = StatisticsConfig::default().with_max_latencies(args.max_latencies);
    let engine = Arc::new(CacheEngine::with_store(
        CacheConfig::new(args.name.clone()),
        store,
        stats_config,
    ));

    let delay = Duration::from_millis(args.producer_delay_ms);
    let load_item = engine.wrap(
        "item",
        move |call_args: Vec<Value>| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, Error>(json!({
                "ID": call_args.first().cloned().unwrap_or(Value::Null),
                "payload": "x".repeat(2048),
            }))
        },
        options,
    );

    let mut observed_hits = 0;
    for i in 0..args.requests {
        // Quadratic residues skew traffic towards a subset of keys
        let id = (i * i + i) % args.keys;
        let outcome: CacheOutcome = load_item.call(&[json!(id)]).await?;
        if outcome.hit {
            observed_hits += 1;
        }
    }

    let current = engine.statistics().current_stats();
    let top_keys = engine.statistics().top_accessed_keys(args.top);

    engine.persist_now().await?;

    let report = Report {
        configuration: engine.runtime_configuration(),
        calls: args.requests,
        observed_hits,
        current,
        top_keys,
        persisted: engine.statistics().stats(Some(Period::Hourly), None, None).await?,
        persisted_keys: engine.statistics().persisted_key_access(args.top).await?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    info!("Workload complete");
    Ok(())
}

/// Cache options from the annotation file, or defaults from the CLI
async fn load_options(args: &Args) -> Result<CacheOptions> {
    if let Some(path) = &args.annotation {
        let text = tokio::fs::read_to_string(path).await?;
        let annotation = CacheAnnotation::from_yaml(&text)?;
        info!("Loaded cache annotation from {}", path.display());
        return Ok(annotation.to_options());
    }

    let mut options = CacheOptions::new()
        .with_tag("items")
        .with_tag(TagConfig::Data(FieldTag::new(["ID"]).with_prefix("item:")));
    if args.ttl_ms > 0 {
        options = options.with_ttl(Duration::from_millis(args.ttl_ms));
    }
    Ok(options)
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so the JSON report on stdout stays parseable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
