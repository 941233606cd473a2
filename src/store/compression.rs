//! Compressed store wrapper
//!
//! LZ4 compression with automatic fallback to the raw payload. Every stored
//! value carries a one-byte header naming the algorithm, so entries written
//! below the size threshold and compressed entries can live side by side.
//!
//! # Example
//!
//! ```
//! use cachewise::store::{CompressionAlgorithm, CompressionManager};
//!
//! let manager = CompressionManager::new();
//!
//! let data = b"Hello, this is test data that should compress well!";
//! let (compressed, algorithm) = manager.compress(data);
//!
//! let decompressed = manager.decompress(&compressed, algorithm).unwrap();
//! assert_eq!(decompressed.as_ref(), data);
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use super::{CacheStore, StoreStats};
use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - fast compression
    #[default]
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Header byte written in front of stored payloads
    pub fn header(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
        }
    }

    /// Parse a header byte
    pub fn from_header(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Default algorithm to use
    pub default_algorithm: CompressionAlgorithm,
    /// Minimum size to compress (smaller payloads are stored uncompressed)
    pub min_size_bytes: u64,
    /// Compression level (algorithm-specific)
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            default_algorithm: CompressionAlgorithm::Lz4,
            min_size_bytes: 1024,
            level: 3,
        }
    }
}

impl CompressionConfig {
    /// Set the minimum payload size worth compressing.
    pub fn with_min_size(mut self, bytes: u64) -> Self {
        self.min_size_bytes = bytes;
        self
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through compressor
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 block compressor
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    /// Create with custom compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Picks an algorithm per payload and falls back to raw bytes
pub struct CompressionManager {
    config: CompressionConfig,
    noop: NoopCompressor,
    lz4: Lz4Compressor,
}

impl CompressionManager {
    /// Create a new compression manager with default config
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            lz4: Lz4Compressor::with_level(config.level),
            noop: NoopCompressor,
            config,
        }
    }

    fn compressor(&self, algorithm: CompressionAlgorithm) -> &dyn Compressor {
        match algorithm {
            CompressionAlgorithm::None => &self.noop,
            CompressionAlgorithm::Lz4 => &self.lz4,
        }
    }

    /// Compress data using the default algorithm
    ///
    /// Returns (payload, algorithm_used). Small payloads, failures and
    /// payloads that do not shrink are returned uncompressed.
    pub fn compress(&self, data: &[u8]) -> (Bytes, CompressionAlgorithm) {
        if (data.len() as u64) < self.config.min_size_bytes {
            return (Bytes::copy_from_slice(data), CompressionAlgorithm::None);
        }

        let algorithm = self.config.default_algorithm;
        match self.compressor(algorithm).compress(data) {
            Ok(compressed) if compressed.len() < data.len() => {
                (Bytes::from(compressed), algorithm)
            }
            Ok(_) => (Bytes::copy_from_slice(data), CompressionAlgorithm::None),
            Err(e) => {
                tracing::warn!("Compression failed, using uncompressed: {}", e);
                (Bytes::copy_from_slice(data), CompressionAlgorithm::None)
            }
        }
    }

    /// Decompress data
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        let decompressed = self.compressor(algorithm).decompress(data)?;
        Ok(Bytes::from(decompressed))
    }

    /// Frame a payload as `[header][body]`
    pub fn encode(&self, data: &[u8]) -> Bytes {
        let (body, algorithm) = self.compress(data);
        let mut framed = BytesMut::with_capacity(body.len() + 1);
        framed.put_u8(algorithm.header());
        framed.extend_from_slice(&body);
        framed.freeze()
    }

    /// Undo [`encode`](Self::encode)
    pub fn decode(&self, framed: &[u8]) -> Result<Bytes> {
        let (&header, body) = framed
            .split_first()
            .ok_or_else(|| Error::DecompressionFailed {
                algorithm: "unknown".into(),
                reason: "empty payload".into(),
            })?;
        let algorithm =
            CompressionAlgorithm::from_header(header).ok_or_else(|| Error::DecompressionFailed {
                algorithm: "unknown".into(),
                reason: format!("unrecognised header byte {}", header),
            })?;
        self.decompress(body, algorithm)
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Compressed Store
// =============================================================================

/// Store wrapper compressing values on the way in and out
pub struct CompressedStore<S> {
    inner: S,
    manager: CompressionManager,
}

impl<S: CacheStore> CompressedStore<S> {
    /// Wrap a store with default compression settings
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, CompressionConfig::default())
    }

    /// Wrap a store with custom compression settings
    pub fn with_config(inner: S, config: CompressionConfig) -> Self {
        Self {
            inner,
            manager: CompressionManager::with_config(config),
        }
    }

    /// Access the wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: CacheStore> CacheStore for CompressedStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self.inner.get(key).await? {
            Some(framed) => Ok(Some(self.manager.decode(&framed)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let framed = self.manager.encode(&value);
        self.inner.set(key, framed, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn iterate(&self) -> Result<Vec<(String, Bytes)>> {
        self.inner
            .iterate()
            .await?
            .into_iter()
            .map(|(key, framed)| Ok((key, self.manager.decode(&framed)?)))
            .collect()
    }

    async fn has(&self, key: &str) -> Result<bool> {
        self.inner.has(key).await
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }
}
