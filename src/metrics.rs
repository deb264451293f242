//! Cache Metrics Collection
//!
//! Per-tier counters for operational dashboards. The statistics surface is
//! read-only and not part of the cache's own correctness.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    durable_hits: AtomicU64,
    durable_misses: AtomicU64,
    agent_hits: AtomicU64,
    agent_misses: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_durable_hit(&self) {
        self.durable_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_durable_miss(&self) {
        self.durable_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_agent_hit(&self) {
        self.agent_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_agent_miss(&self) {
        self.agent_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn memory_hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
    }

    pub fn memory_misses(&self) -> u64 {
        self.memory_misses.load(Ordering::Relaxed)
    }

    pub fn durable_hits(&self) -> u64 {
        self.durable_hits.load(Ordering::Relaxed)
    }

    pub fn durable_misses(&self) -> u64 {
        self.durable_misses.load(Ordering::Relaxed)
    }

    pub fn agent_hits(&self) -> u64 {
        self.agent_hits.load(Ordering::Relaxed)
    }

    pub fn agent_misses(&self) -> u64 {
        self.agent_misses.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Resident entries in the memory tier
    pub memory_entries: usize,
    /// Records in the durable tier
    pub durable_entries: usize,
    /// Entries held by the background network agent (0 when no agent)
    pub agent_entries: usize,
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub durable_hits: u64,
    pub durable_misses: u64,
    pub agent_hits: u64,
    pub agent_misses: u64,
    pub invalidations: u64,
}

impl CacheStats {
    /// Total entries across all tiers
    pub fn total_entries(&self) -> usize {
        self.memory_entries + self.durable_entries + self.agent_entries
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = CacheMetrics::new();

        metrics.record_memory_hit();
        metrics.record_memory_hit();
        metrics.record_memory_miss();
        metrics.record_durable_hit();
        metrics.record_invalidation(3);

        assert_eq!(metrics.memory_hits(), 2);
        assert_eq!(metrics.memory_misses(), 1);
        assert_eq!(metrics.durable_hits(), 1);
        assert_eq!(metrics.invalidations(), 3);
    }

    #[test]
    fn test_stats_total() {
        let stats = CacheStats {
            memory_entries: 2,
            durable_entries: 3,
            agent_entries: 1,
            ..Default::default()
        };
        assert_eq!(stats.total_entries(), 6);
    }
}
