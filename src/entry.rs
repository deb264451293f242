//! Cache Entry Types
//!
//! Canonical representation of one cached response, shared by every tier.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Fast non-cryptographic hash (FxHash algorithm)
#[inline]
pub(crate) fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Cache key - `"{METHOD}:{url}:{params_hash}"`
///
/// Built by [`crate::resolver::generate_key`]; the full string is the
/// identity, so two requests differing in method, URL, or parameters never
/// collide. Equality and hashing go through the string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-formatted key string
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get the key as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substring match used by pattern invalidation
    #[inline]
    pub fn matches(&self, pattern: &str) -> bool {
        self.0.contains(pattern)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache entry containing a serialized payload and its lifetime metadata
///
/// The payload is opaque serialized JSON. `compressed` marks whether the
/// bytes have been run through the compression codec; entries held in the
/// memory tier are always uncompressed, the flag exists for the durable
/// record round-trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// Serialized payload bytes (possibly compressed)
    payload: Bytes,
    /// Whether `payload` is compressed
    compressed: bool,
    /// Write timestamp, milliseconds since epoch
    created_at_ms: u64,
    /// Lifetime in milliseconds
    ttl_ms: u64,
    /// Origin ETag validator (passthrough, reserved for revalidation)
    etag: Option<String>,
    /// Origin Last-Modified validator (passthrough, reserved)
    last_modified: Option<String>,
}

impl CacheEntry {
    /// Create a new entry written now
    pub fn new(payload: Bytes, ttl_ms: u64) -> Self {
        Self::from_parts(payload, false, now_ms(), ttl_ms)
    }

    /// Create an entry from explicit parts (record decode, tier transfers)
    pub fn from_parts(payload: Bytes, compressed: bool, created_at_ms: u64, ttl_ms: u64) -> Self {
        Self {
            payload,
            compressed,
            created_at_ms,
            ttl_ms,
            etag: None,
            last_modified: None,
        }
    }

    /// Attach origin validators
    pub fn with_validators(mut self, etag: Option<String>, last_modified: Option<String>) -> Self {
        self.etag = etag;
        self.last_modified = last_modified;
        self
    }

    /// Get payload bytes (zero-copy)
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether the payload is compressed
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Write timestamp, milliseconds since epoch
    #[inline]
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Lifetime in milliseconds
    #[inline]
    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Origin ETag, if the response carried one
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Origin Last-Modified, if the response carried one
    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    /// Validity check against an explicit clock
    ///
    /// The entry is valid iff `now - created_at < ttl`.
    #[inline]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) >= self.ttl_ms
    }

    /// Validity check against the wall clock
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }

    /// Encode as a self-describing durable record
    pub fn to_record(&self) -> DurableRecord {
        DurableRecord {
            payload: self.payload.to_vec(),
            compressed: self.compressed,
            created_at_ms: self.created_at_ms,
            ttl_ms: self.ttl_ms,
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }

    /// Decode from a durable record
    pub fn from_record(record: DurableRecord) -> Self {
        Self {
            payload: Bytes::from(record.payload),
            compressed: record.compressed,
            created_at_ms: record.created_at_ms,
            ttl_ms: record.ttl_ms,
            etag: record.etag,
            last_modified: record.last_modified,
        }
    }
}

/// Self-describing on-disk record for the durable tier
///
/// Serialized with serde_json; round-trips exactly for both compressed and
/// uncompressed payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurableRecord {
    pub payload: Vec<u8>,
    pub compressed: bool,
    pub created_at_ms: u64,
    pub ttl_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
