//! Durable Tier - Persistent Local Key-Value Store
//!
//! Entries are serialized as self-describing records; payloads over the
//! compression threshold are compressed before storage when the policy asks
//! for it. The store itself is pluggable behind [`DurableStore`].
//!
//! Failure semantics: a write failure (quota) is surfaced to the caller; a
//! read of a corrupt record is treated as a miss and the record is deleted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::compression::CompressionCodec;
use crate::entry::{CacheEntry, CacheKey, DurableRecord};
use crate::error::{Error, Result};

/// Durable storage backend trait
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read a raw record
    async fn read(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a raw record; must fail loudly on quota exhaustion
    async fn write(&self, key: &str, record: Bytes) -> Result<()>;

    /// Delete a record, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All stored keys (pattern invalidation, stats)
    async fn keys(&self) -> Result<Vec<String>>;

    /// Drop every record
    async fn clear(&self) -> Result<()>;

    /// Number of stored records
    async fn len(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }
}

/// In-memory reference store with an optional byte quota
///
/// Stands in for the browser/client durable storage in tests and for
/// memory-only deployments.
pub struct InMemoryDurableStore {
    records: DashMap<String, Bytes>,
    quota_bytes: Option<u64>,
    used_bytes: AtomicU64,
}

impl InMemoryDurableStore {
    /// Unbounded store
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            quota_bytes: None,
            used_bytes: AtomicU64::new(0),
        }
    }

    /// Store that rejects writes once `quota_bytes` is exceeded
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            records: DashMap::new(),
            quota_bytes: Some(quota_bytes),
            used_bytes: AtomicU64::new(0),
        }
    }

    /// Bytes currently stored
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn write(&self, key: &str, record: Bytes) -> Result<()> {
        let new_size = record.len() as u64;
        let old_size = self.records.get(key).map(|r| r.len() as u64).unwrap_or(0);

        if let Some(quota) = self.quota_bytes {
            let projected = self.used_bytes.load(Ordering::Relaxed) - old_size + new_size;
            if projected > quota {
                return Err(Error::DurableWriteFailed {
                    key: key.to_string(),
                    reason: format!("quota exceeded ({projected} > {quota} bytes)"),
                });
            }
        }

        self.records.insert(key.to_string(), record);
        if new_size >= old_size {
            self.used_bytes
                .fetch_add(new_size - old_size, Ordering::Relaxed);
        } else {
            self.used_bytes
                .fetch_sub(old_size - new_size, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self.records.remove(key) {
            Some((_, record)) => {
                self.used_bytes
                    .fetch_sub(record.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.records.iter().map(|r| r.key().clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.records.clear();
        self.used_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

/// Record codec layered over a [`DurableStore`]
pub struct DurableTier {
    store: Arc<dyn DurableStore>,
    codec: CompressionCodec,
}

impl DurableTier {
    /// Create over a store with the deflate codec
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_codec(store, CompressionCodec::deflate())
    }

    /// Create with an explicit codec
    pub fn with_codec(store: Arc<dyn DurableStore>, codec: CompressionCodec) -> Self {
        Self { store, codec }
    }

    /// Write an entry, compressing over-threshold payloads when `compress`
    ///
    /// The entry handed in always carries an uncompressed payload; the
    /// compressed form exists only inside the stored record.
    pub async fn put(&self, key: &CacheKey, entry: &CacheEntry, compress: bool) -> Result<()> {
        let (payload, compressed) = if compress {
            self.codec.compress(entry.payload())
        } else {
            (entry.payload().clone(), false)
        };

        let record = DurableRecord {
            payload: payload.to_vec(),
            compressed,
            created_at_ms: entry.created_at_ms(),
            ttl_ms: entry.ttl_ms(),
            etag: entry.etag().map(str::to_owned),
            last_modified: entry.last_modified().map(str::to_owned),
        };
        let bytes = Bytes::from(serde_json::to_vec(&record)?);
        self.store.write(key.as_str(), bytes).await
    }

    /// Read an entry, applying lazy expiry and corruption handling
    ///
    /// Returns the entry with its payload decompressed. A record that fails
    /// to decode or decompress is deleted and reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let Some(raw) = self.store.read(key.as_str()).await? else {
            return Ok(None);
        };

        let record: DurableRecord = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "corrupt durable record, deleting");
                self.store.delete(key.as_str()).await?;
                return Ok(None);
            }
        };

        let entry = CacheEntry::from_record(record);
        if entry.is_expired() {
            self.store.delete(key.as_str()).await?;
            return Ok(None);
        }

        let payload = match self.codec.decompress(entry.payload(), entry.is_compressed()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecompressable durable record, deleting");
                self.store.delete(key.as_str()).await?;
                return Ok(None);
            }
        };

        Ok(Some(
            CacheEntry::from_parts(payload, false, entry.created_at_ms(), entry.ttl_ms())
                .with_validators(
                    entry.etag().map(str::to_owned),
                    entry.last_modified().map(str::to_owned),
                ),
        ))
    }

    /// Delete an entry
    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.store.delete(key.as_str()).await
    }

    /// Delete every record whose key contains `pattern`
    pub async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let mut removed = 0;
        for key in self.store.keys().await? {
            if key.contains(pattern) && self.store.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Number of stored records
    pub async fn len(&self) -> Result<usize> {
        self.store.len().await
    }

    /// Drop all records
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }
}

// =============================================================================
// Tests
// =============================================================================
