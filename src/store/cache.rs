//! Node caches: a capacity-bounded LRU and a speculative overlay.
//!
//! All caches expose the same object-safe contract, so a speculative
//! computation can wrap the shared LRU in an overlay and hand the composite
//! to a trie without the trie knowing the difference.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxBuildHasher;

use super::metrics::CacheMetrics;
use crate::merkle::{Node, NodeKey};

type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// Default cache capacity in nodes. Roughly 64MB of resident nodes, sized
/// for TEE environments where enclave memory is scarce.
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// Shared contract for node caches.
///
/// Methods take `&self`; implementations use interior mutability so caches
/// can be shared across threads behind an `Arc`.
pub trait NodeCache: Send + Sync {
    /// Returns the cached node for a key, if present.
    fn get(&self, key: &NodeKey) -> Option<Node>;

    /// Inserts or updates a node.
    fn put(&self, key: NodeKey, node: Node);

    /// Drops all cached entries.
    fn clear(&self);

    /// Returns the number of cached entries.
    fn len(&self) -> usize;

    /// Returns true if the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct LruInner {
    /// Node plus its recency tick.
    entries: FastHashMap<NodeKey, (Node, u64)>,
    /// Recency index: oldest tick first.
    recency: BTreeMap<u64, NodeKey>,
    /// Monotone tick source.
    tick: u64,
}

impl LruInner {
    fn touch(&mut self, key: &NodeKey, old_tick: u64) -> u64 {
        self.tick += 1;
        self.recency.remove(&old_tick);
        self.recency.insert(self.tick, key.clone());
        self.tick
    }
}

/// Capacity-bounded LRU cache over `(version, path)` node keys.
///
/// `get` promotes the entry to most-recently-used, so both `get` and `put`
/// take the lock exclusively; only `len` can use the shared mode.
pub struct LruNodeCache {
    capacity: usize,
    inner: RwLock<LruInner>,
    metrics: CacheMetrics,
}

impl LruNodeCache {
    /// Creates a cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Creates a cache bounded to `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(LruInner {
                entries: FastHashMap::with_hasher(FxBuildHasher),
                recency: BTreeMap::new(),
                tick: 0,
            }),
            metrics: CacheMetrics::new(),
        }
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the cache metrics.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

impl Default for LruNodeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCache for LruNodeCache {
    fn get(&self, key: &NodeKey) -> Option<Node> {
        let mut inner = self.inner.write();
        let old_tick = match inner.entries.get(key) {
            Some((_, tick)) => *tick,
            None => {
                self.metrics.inc_misses();
                return None;
            }
        };
        let new_tick = inner.touch(key, old_tick);
        let entry = inner.entries.get_mut(key).unwrap();
        entry.1 = new_tick;
        let node = entry.0.clone();
        self.metrics.inc_hits();
        Some(node)
    }

    fn put(&self, key: NodeKey, node: Node) {
        let mut inner = self.inner.write();

        if let Some(old_tick) = inner.entries.get(&key).map(|(_, tick)| *tick) {
            let new_tick = inner.touch(&key, old_tick);
            *inner.entries.get_mut(&key).unwrap() = (node, new_tick);
            return;
        }

        if inner.entries.len() >= self.capacity {
            if let Some((_, oldest)) = inner.recency.pop_first() {
                inner.entries.remove(&oldest);
                self.metrics.inc_evictions();
            }
        }

        inner.tick += 1;
        let tick = inner.tick;
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(key, (node, tick));
        self.metrics.inc_insertions();
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.recency.clear();
    }

    fn len(&self) -> usize {
        self.inner.read().entries.len()
    }
}

#[derive(Default)]
struct SpeculativeInner {
    /// Nodes written by the speculative computation.
    overlay: FastHashMap<NodeKey, Node>,
    /// Externally supplied warm nodes not yet in the base cache.
    injected: FastHashMap<NodeKey, Node>,
}

/// Overlay cache for speculative execution.
///
/// Reads resolve overlay, then injected nodes, then the base cache. Writes
/// land only in the overlay and `clear` drops only the private maps, so a
/// speculative recomputation can never pollute the shared base.
pub struct SpeculativeCache {
    base: Arc<dyn NodeCache>,
    inner: Mutex<SpeculativeInner>,
}

impl SpeculativeCache {
    /// Creates an overlay over the given base cache.
    pub fn new(base: Arc<dyn NodeCache>) -> Self {
        Self {
            base,
            inner: Mutex::new(SpeculativeInner::default()),
        }
    }

    /// Seeds an externally supplied node, typically from the parent chain of
    /// an earlier speculative batch that has not been persisted yet.
    pub fn inject(&self, key: NodeKey, node: Node) {
        self.inner.lock().injected.insert(key, node);
    }
}

impl NodeCache for SpeculativeCache {
    fn get(&self, key: &NodeKey) -> Option<Node> {
        {
            let inner = self.inner.lock();
            if let Some(node) = inner.overlay.get(key) {
                return Some(node.clone());
            }
            if let Some(node) = inner.injected.get(key) {
                return Some(node.clone());
            }
        }
        self.base.get(key)
    }

    fn put(&self, key: NodeKey, node: Node) {
        self.inner.lock().overlay.insert(key, node);
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.overlay.clear();
        inner.injected.clear();
    }

    fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.overlay.len() + inner.injected.len()
    }
}
