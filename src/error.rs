//! Error types for the caching engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the cache layer.
///
/// Producer failures are never represented here: a wrapped producer's own
/// error type is returned to the caller unchanged.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing store unavailable or rejected the operation
    #[error("Store error: {0}")]
    Store(String),

    /// Value could not be serialized or deserialized at the store boundary
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML annotation could not be parsed
    #[error("Failed to parse annotation: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Persisting statistics failed
    #[error("Statistics persistence failed: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },
}

impl Error {
    /// True for failures of the backing store or its serialization boundary.
    ///
    /// These are the errors the engine degrades to a miss unless configured
    /// to throw.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Error::Store(_)
                | Error::Serialization(_)
                | Error::Io(_)
                | Error::CompressionFailed { .. }
                | Error::DecompressionFailed { .. }
        )
    }
}
