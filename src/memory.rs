//! Memory Tier - In-Process Bounded Map
//!
//! Fast volatile tier holding uncompressed entries. On write, if the map
//! exceeds its capacity the entries with the oldest `created_at` are evicted
//! until the map is back under the limit.
//!
//! Eviction is recency-of-write, not LRU: reads do not refresh an entry's
//! `created_at`, so a frequently read but old entry is still evicted before
//! a fresh one. This matches the shipped behavior and is kept intentionally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::entry::{CacheEntry, CacheKey};

/// Memory tier configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum number of resident entries
    pub max_entries: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { max_entries: 100 }
    }
}

/// Bounded in-process tier
pub struct MemoryTier {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    config: MemoryConfig,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl MemoryTier {
    /// Create with default capacity
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get an entry, applying lazy expiry
    ///
    /// An expired entry is deleted and reported absent.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: upgrade to a write lock and remove, re-checking in case
        // the entry was replaced between locks.
        let mut entries = self.entries.write();
        if entries.get(key).map(CacheEntry::is_expired).unwrap_or(false) {
            entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Insert an entry, evicting the oldest writes if over capacity
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) {
        let mut entries = self.entries.write();
        entries.insert(key, entry);

        while entries.len() > self.config.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.created_at_ms())
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %k, "evicted oldest entry from memory tier");
                }
                None => break,
            }
        }
    }

    /// Remove an entry
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove every entry whose key contains `pattern`
    pub fn remove_matching(&self, pattern: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !k.matches(pattern));
        before - entries.len()
    }

    /// Whether a key is resident (ignores expiry)
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the tier is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.config.max_entries
    }

    /// Capacity evictions so far
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Lazy-expiry removals so far
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
