//! Error types for the tiered response cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the response cache subsystem
///
/// The taxonomy follows the failure semantics of the cache: durable write
/// failures are surfaced so callers can degrade to memory-only caching,
/// corruption is converted to a miss at the tier boundary, and network
/// failures are split into transient (retried) and permanent (propagated).
#[derive(Error, Debug)]
pub enum Error {
    /// Durable-tier write was rejected (e.g. storage quota exceeded)
    #[error("durable write failed for key {key}: {reason}")]
    DurableWriteFailed { key: String, reason: String },

    /// Durable-tier read returned an undecodable record
    ///
    /// Callers never see this as an error from `CacheManager::get`; the
    /// corrupt record is deleted and the read reports a miss.
    #[error("corrupt cache record for key {key}")]
    CacheCorruption { key: String },

    /// Transient network failure (transport error or 5xx) - retried with backoff
    #[error("transient network failure{}: {reason}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    NetworkTransient { status: Option<u16>, reason: String },

    /// Permanent network failure (4xx) - propagated immediately, never cached
    #[error("permanent network failure (status {status}): {reason}")]
    NetworkPermanent { status: u16, reason: String },

    /// Compression failed
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Decompression failed
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Request exceeded its configured timeout
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No network and no cached copy to fall back to
    #[error("offline and no cached copy available for {url}")]
    Offline { url: String },

    /// The background network agent is not running or its channel is closed
    #[error("network agent unavailable")]
    AgentUnavailable,

    /// A named agent cache that does not exist was addressed
    #[error("unknown cache: {0}")]
    UnknownCache(String),

    /// Payload (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the request executor should retry after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NetworkTransient { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================
