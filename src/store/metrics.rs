//! Cache metrics for observability.
//!
//! Tracks statistics about node cache operations for monitoring and
//! debugging.

use std::sync::atomic::{AtomicU64, Ordering};

/// Node cache metrics container.
///
/// All counters are atomic for thread-safe access.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Number of lookups that found a cached node.
    pub hits: AtomicU64,
    /// Number of lookups that missed.
    pub misses: AtomicU64,
    /// Number of nodes inserted.
    pub insertions: AtomicU64,
    /// Number of nodes evicted to stay within capacity.
    pub evictions: AtomicU64,
}

impl CacheMetrics {
    /// Creates a new metrics container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the hit counter.
    pub fn inc_hits(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the miss counter.
    pub fn inc_misses(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the insertion counter.
    pub fn inc_insertions(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the eviction counter.
    pub fn inc_evictions(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.insertions.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of cache metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

impl CacheMetricsSnapshot {
    /// Hit rate over all lookups, or 0.0 when no lookups happened.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = CacheMetrics::new();
        metrics.inc_hits();
        metrics.inc_hits();
        metrics.inc_misses();
        metrics.inc_insertions();
        metrics.inc_evictions();

        let snap = metrics.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.insertions, 1);
        assert_eq!(snap.evictions, 1);
    }

    #[test]
    fn test_hit_rate() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.snapshot().hit_rate(), 0.0);

        metrics.inc_hits();
        metrics.inc_hits();
        metrics.inc_misses();
        metrics.inc_misses();
        assert!((metrics.snapshot().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();
        metrics.inc_hits();
        metrics.reset();
        assert_eq!(metrics.snapshot(), CacheMetricsSnapshot::default());
    }
}
