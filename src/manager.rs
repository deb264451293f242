//! Tiered Cache Manager
//!
//! Routes reads and writes across the storage tiers according to the
//! policy attached to each request:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       CacheManager                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  memory   │ bounded in-process map, fastest, lost on restart│
//! │  durable  │ persistent KV records, survives restarts        │
//! │  agent    │ delegated to the background network agent       │
//! │  hybrid   │ write-through memory + durable; read-through    │
//! │           │ with memory repopulation                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values are serialized to JSON at the manager boundary, so the tiers
//! only ever move opaque payload bytes. Expiry is lazy everywhere: an
//! expired entry is detected and deleted by the read that finds it.

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::agent::AgentHandle;
use crate::compression::{CompressionCodec, CompressionConfig};
use crate::durable::{DurableStore, DurableTier, InMemoryDurableStore};
use crate::entry::{CacheEntry, CacheKey};
use crate::error::Result;
use crate::memory::{MemoryConfig, MemoryTier};
use crate::metrics::{CacheMetrics, CacheStats};
use crate::policy::{CachePolicy, CacheTier};

/// Cache manager configuration
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub memory: MemoryConfig,
    pub compression: CompressionConfig,
}

/// Orchestrates the memory, durable, and agent tiers
pub struct CacheManager {
    memory: MemoryTier,
    durable: DurableTier,
    agent: Option<AgentHandle>,
    metrics: Arc<CacheMetrics>,
}

impl CacheManager {
    /// Create a manager over the given durable store with default config
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    /// Create a manager with explicit configuration
    pub fn with_config(store: Arc<dyn DurableStore>, config: CacheConfig) -> Self {
        let level = config.compression.level;
        let codec = CompressionCodec::with_backend(
            config.compression,
            Box::new(crate::compression::DeflateCompressor::with_level(level)),
        );
        Self {
            memory: MemoryTier::with_config(config.memory),
            durable: DurableTier::with_codec(store, codec),
            agent: None,
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    /// Convenience constructor backed by an in-memory durable store
    ///
    /// Useful in tests and single-process setups where durability across
    /// restarts is not needed.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDurableStore::new()))
    }

    /// Attach a handle to a running background network agent
    pub fn with_agent(mut self, agent: AgentHandle) -> Self {
        self.agent = Some(agent);
        self
    }

    // =========================================================================
    // Core operations
    // =========================================================================

    /// Store a value under `key` according to `policy`
    ///
    /// Hybrid writes go memory first, then durable; a durable failure
    /// (e.g. quota) is surfaced after the memory half landed, so callers
    /// can degrade to memory-only caching.
    pub async fn set<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        policy: &CachePolicy,
    ) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(value)?);
        let entry = CacheEntry::new(payload, policy.ttl_ms());

        match policy.tier {
            CacheTier::Memory => {
                self.memory.insert(key.clone(), entry);
            }
            CacheTier::Durable => {
                self.durable.put(key, &entry, policy.compress).await?;
            }
            CacheTier::Hybrid => {
                self.memory.insert(key.clone(), entry.clone());
                self.durable.put(key, &entry, policy.compress).await?;
            }
            CacheTier::Agent => {
                let record = Bytes::from(serde_json::to_vec(&entry.to_record())?);
                self.agent_handle()?.store(key, record, policy.ttl).await?;
            }
        }

        debug!(key = %key, tier = %policy.tier, ttl_ms = policy.ttl_ms(), "cache set");
        Ok(())
    }

    /// Look up `key`, deserializing the payload on a hit
    ///
    /// Hybrid reads check memory first and repopulate it from a durable
    /// hit. Expired and corrupt entries surface as misses.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        policy: &CachePolicy,
    ) -> Result<Option<T>> {
        let entry = match policy.tier {
            CacheTier::Memory => self.memory_lookup(key),
            CacheTier::Durable => self.durable_lookup(key).await?,
            CacheTier::Hybrid => match self.memory_lookup(key) {
                Some(entry) => Some(entry),
                None => {
                    let entry = self.durable_lookup(key).await?;
                    if let Some(ref entry) = entry {
                        // Repopulate the fast tier with the original
                        // write timestamp intact.
                        self.memory.insert(key.clone(), entry.clone());
                    }
                    entry
                }
            },
            CacheTier::Agent => self.agent_lookup(key).await?,
        };

        match entry {
            Some(entry) => Ok(Some(serde_json::from_slice(entry.payload())?)),
            None => Ok(None),
        }
    }

    /// Remove one key from every tier it may live in
    ///
    /// Returns true when any tier held the key.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let mut removed = self.memory.remove(key);
        removed |= self.durable.delete(key).await?;
        if let Some(agent) = &self.agent {
            removed |= agent.delete(key).await?;
        }

        if removed {
            self.metrics.record_invalidation(1);
        }
        Ok(removed)
    }

    /// Remove every key containing `pattern`, across all tiers
    ///
    /// Returns the total number of entries removed.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize> {
        let mut removed = self.memory.remove_matching(pattern);
        removed += self.durable.delete_matching(pattern).await?;
        if let Some(agent) = &self.agent {
            removed += agent.delete_matching(pattern).await?;
        }

        self.metrics.record_invalidation(removed as u64);
        debug!(pattern, removed, "pattern invalidation");
        Ok(removed)
    }

    /// Drop every cached entry in every tier
    pub async fn clear_all(&self) -> Result<()> {
        self.memory.clear();
        self.durable.clear().await?;
        if let Some(agent) = &self.agent {
            // Every key contains the empty pattern.
            agent.delete_matching("").await?;
        }
        Ok(())
    }

    /// Point-in-time statistics across all tiers
    pub async fn stats(&self) -> Result<CacheStats> {
        let agent_entries = match &self.agent {
            Some(agent) => agent.entry_count().await?,
            None => 0,
        };

        Ok(CacheStats {
            memory_entries: self.memory.len(),
            durable_entries: self.durable.len().await?,
            agent_entries,
            memory_hits: self.metrics.memory_hits(),
            memory_misses: self.metrics.memory_misses(),
            durable_hits: self.metrics.durable_hits(),
            durable_misses: self.metrics.durable_misses(),
            agent_hits: self.metrics.agent_hits(),
            agent_misses: self.metrics.agent_misses(),
            invalidations: self.metrics.invalidations(),
        })
    }

    // =========================================================================
    // Tier access
    // =========================================================================

    /// Direct access to the memory tier
    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    /// Direct access to the durable tier
    pub fn durable(&self) -> &DurableTier {
        &self.durable
    }

    /// Shared metrics handle
    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    // =========================================================================
    // Internal lookups (metrics attach here)
    // =========================================================================

    fn memory_lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.memory.get(key) {
            Some(entry) => {
                self.metrics.record_memory_hit();
                Some(entry)
            }
            None => {
                self.metrics.record_memory_miss();
                None
            }
        }
    }

    async fn durable_lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let entry = self.durable.get(key).await?;
        match entry {
            Some(_) => self.metrics.record_durable_hit(),
            None => self.metrics.record_durable_miss(),
        }
        Ok(entry)
    }

    async fn agent_lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let agent = self.agent_handle()?;
        let Some(record) = agent.load(key).await? else {
            self.metrics.record_agent_miss();
            return Ok(None);
        };

        match serde_json::from_slice(&record) {
            Ok(record) => {
                let entry = CacheEntry::from_record(record);
                if entry.is_expired() {
                    agent.delete(key).await?;
                    self.metrics.record_agent_miss();
                    return Ok(None);
                }
                self.metrics.record_agent_hit();
                Ok(Some(entry))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable agent record, deleting");
                agent.delete(key).await?;
                self.metrics.record_agent_miss();
                Ok(None)
            }
        }
    }

    fn agent_handle(&self) -> Result<&AgentHandle> {
        self.agent
            .as_ref()
            .ok_or(crate::error::Error::AgentUnavailable)
    }
}

// =============================================================================
// Tests
// =============================================================================
