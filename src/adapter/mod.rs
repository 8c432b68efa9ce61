//! Accumulator facade over the versioned trie.
//!
//! Callers that update one key at a time `put` into a pending map and flush
//! everything as a single ordered batch with `calculate_root`. A speculative
//! variant runs the same computation on an overlay cache, so transaction
//! pre-execution can compute a hypothetical root without polluting shared
//! state.

use std::sync::Arc;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::merkle::{
    decode_node, keccak512, Hash, NodeKey, Result, TreeUpdateBatch, VersionedTrie, EMPTY_ROOT,
};
use crate::store::{LruNodeCache, NodeCache, NodeReader, SpeculativeCache};

type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// Facade bridging single-key callers to the batch engine.
///
/// Holds the shared LRU cache and the reader over durable storage; the trie
/// itself is stateless. `put` accumulates, `calculate_root` flushes the
/// accumulated updates as one deterministic batch.
pub struct TrieAdapter {
    reader: Arc<dyn NodeReader>,
    cache: Arc<LruNodeCache>,
    tree: VersionedTrie,
    /// Pending updates, keyed by hashed key. Cleared on flush.
    pending: FastHashMap<Hash, Vec<u8>>,
    current_version: u64,
    last_root: Hash,
}

impl TrieAdapter {
    /// Creates an adapter over the given reader with the default cache size.
    pub fn new(reader: Arc<dyn NodeReader>) -> Self {
        Self::with_cache_capacity(reader, crate::store::DEFAULT_CACHE_CAPACITY)
    }

    /// Creates an adapter with an explicit cache capacity.
    pub fn with_cache_capacity(reader: Arc<dyn NodeReader>, capacity: usize) -> Self {
        let cache = Arc::new(LruNodeCache::with_capacity(capacity));
        let tree = VersionedTrie::new(
            Arc::clone(&reader),
            Arc::clone(&cache) as Arc<dyn NodeCache>,
        );
        Self {
            reader,
            cache,
            tree,
            pending: FastHashMap::with_hasher(FxBuildHasher),
            current_version: 0,
            last_root: EMPTY_ROOT,
        }
    }

    /// Accumulates a single key-value update for the next flush.
    ///
    /// The raw key is hashed to the full key width; value bytes are the
    /// caller's value hash. Hashing (rather than padding or truncating)
    /// keeps keys of different lengths collision-free.
    pub fn put(&mut self, raw_key: &[u8], value_hash: Hash, version: u64) {
        let key_hash = keccak512(raw_key);
        self.pending.insert(key_hash, value_hash.to_vec());
        self.current_version = version;
    }

    /// Flushes explicit updates plus everything accumulated by [`put`] as
    /// one batch on top of `base_root`, and remembers the resulting root.
    ///
    /// An empty merged batch leaves the tree untouched and commits the base
    /// root as-is.
    ///
    /// [`put`]: TrieAdapter::put
    pub fn calculate_root(
        &mut self,
        updates: &[(Vec<u8>, Hash)],
        base_root: Hash,
        version: u64,
        base_version: Option<u64>,
    ) -> Result<TreeUpdateBatch> {
        let mut batch: Vec<(Hash, Option<Vec<u8>>)> =
            Vec::with_capacity(updates.len() + self.pending.len());
        for (raw_key, value_hash) in updates {
            batch.push((keccak512(raw_key), Some(value_hash.to_vec())));
        }
        for (key_hash, value) in &self.pending {
            batch.push((*key_hash, Some(value.clone())));
        }

        if batch.is_empty() {
            self.current_version = version;
            self.last_root = base_root;
            return Ok(TreeUpdateBatch::unchanged(base_root));
        }

        let result = self
            .tree
            .put_value_set(batch, version, Some(base_root), base_version)?;

        self.pending.clear();
        self.current_version = version;
        self.last_root = result.new_root_hash;
        Ok(result)
    }

    /// Runs the same computation as [`calculate_root`] on a speculative
    /// overlay: the shared cache, the adapter state and the pending map are
    /// all left untouched.
    ///
    /// `warm_nodes` optionally seeds the overlay with `(encoded node key,
    /// framed node bytes)` pairs, typically the not-yet-persisted parent
    /// chain of an earlier speculative batch. Undecodable pairs are skipped.
    ///
    /// [`calculate_root`]: TrieAdapter::calculate_root
    pub fn calculate_root_speculative(
        &self,
        updates: &[(Vec<u8>, Hash)],
        base_root: Hash,
        version: u64,
        base_version: Option<u64>,
        warm_nodes: Option<&[(Vec<u8>, Vec<u8>)]>,
    ) -> Result<TreeUpdateBatch> {
        let overlay = SpeculativeCache::new(Arc::clone(&self.cache) as Arc<dyn NodeCache>);
        if let Some(warm_nodes) = warm_nodes {
            for (key_bytes, node_bytes) in warm_nodes {
                if let (Some(key), Ok(node)) =
                    (NodeKey::decode(key_bytes), decode_node(node_bytes))
                {
                    overlay.inject(key, node);
                }
            }
        }

        let spec_tree = VersionedTrie::new(
            Arc::clone(&self.reader),
            Arc::new(overlay) as Arc<dyn NodeCache>,
        );

        let batch: Vec<(Hash, Option<Vec<u8>>)> = updates
            .iter()
            .map(|(raw_key, value_hash)| (keccak512(raw_key), Some(value_hash.to_vec())))
            .collect();
        spec_tree.put_value_set(batch, version, Some(base_root), base_version)
    }

    /// Applies a batch of raw-key updates directly, bypassing the pending
    /// map.
    pub fn update_batch_with_precomputed_hashes(
        &mut self,
        updates: &[(Vec<u8>, Hash)],
        version: u64,
        base_root: Option<Hash>,
        base_version: Option<u64>,
    ) -> Result<TreeUpdateBatch> {
        let batch: Vec<(Hash, Option<Vec<u8>>)> = updates
            .iter()
            .map(|(raw_key, value_hash)| (keccak512(raw_key), Some(value_hash.to_vec())))
            .collect();
        let result = self
            .tree
            .put_value_set(batch, version, base_root, base_version)?;
        self.current_version = version;
        self.last_root = result.new_root_hash;
        Ok(result)
    }

    /// Looks up the value hash stored under a raw key at a version.
    pub fn get(&self, raw_key: &[u8], version: u64) -> Result<Option<Hash>> {
        self.tree.get(&keccak512(raw_key), version)
    }

    /// Returns the root hash at a version, answering from the last flush
    /// when the version matches.
    pub fn get_root_hash(&self, version: u64) -> Result<Hash> {
        if version == self.current_version {
            return Ok(self.last_root);
        }
        self.tree.get_root_hash(version)
    }

    /// Number of entries currently in the shared cache.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Number of accumulated updates waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryNodeStore;

    fn adapter() -> (TrieAdapter, Arc<MemoryNodeStore>) {
        let store = Arc::new(MemoryNodeStore::new());
        let adapter = TrieAdapter::with_cache_capacity(
            Arc::clone(&store) as Arc<dyn NodeReader>,
            1000,
        );
        (adapter, store)
    }

    #[test]
    fn test_put_accumulates_until_flush() {
        let (mut adapter, _) = adapter();
        adapter.put(b"account-1", keccak512(b"v1"), 1);
        adapter.put(b"account-2", keccak512(b"v2"), 1);
        assert_eq!(adapter.pending_len(), 2);

        let batch = adapter
            .calculate_root(&[], EMPTY_ROOT, 1, None)
            .unwrap();
        assert_ne!(batch.new_root_hash, EMPTY_ROOT);
        assert_eq!(adapter.pending_len(), 0);

        // Values come back as the hash of the stored value-hash bytes.
        assert_eq!(
            adapter.get(b"account-1", 1).unwrap(),
            Some(keccak512(&keccak512(b"v1")))
        );
    }

    #[test]
    fn test_put_overwrites_pending_value() {
        let (mut adapter, _) = adapter();
        adapter.put(b"k", keccak512(b"old"), 1);
        adapter.put(b"k", keccak512(b"new"), 1);
        assert_eq!(adapter.pending_len(), 1);

        adapter.calculate_root(&[], EMPTY_ROOT, 1, None).unwrap();
        assert_eq!(
            adapter.get(b"k", 1).unwrap(),
            Some(keccak512(&keccak512(b"new")))
        );
    }

    #[test]
    fn test_empty_flush_returns_base_root() {
        let (mut adapter, _) = adapter();
        let base = keccak512(b"some-root");
        let batch = adapter.calculate_root(&[], base, 5, None).unwrap();
        assert_eq!(batch.new_root_hash, base);
        assert!(batch.node_batch.is_empty());
        assert_eq!(adapter.get_root_hash(5).unwrap(), base);
    }

    #[test]
    fn test_explicit_and_pending_updates_merge() {
        let (mut adapter, _) = adapter();
        adapter.put(b"pending", keccak512(b"p"), 1);

        let batch = adapter
            .calculate_root(
                &[(b"explicit".to_vec(), keccak512(b"e"))],
                EMPTY_ROOT,
                1,
                None,
            )
            .unwrap();
        assert_ne!(batch.new_root_hash, EMPTY_ROOT);
        assert!(adapter.get(b"pending", 1).unwrap().is_some());
        assert!(adapter.get(b"explicit", 1).unwrap().is_some());
    }

    #[test]
    fn test_speculative_matches_real_flush() {
        let (mut adapter, _) = adapter();
        let updates = vec![
            (b"a".to_vec(), keccak512(b"1")),
            (b"b".to_vec(), keccak512(b"2")),
        ];

        let speculative = adapter
            .calculate_root_speculative(&updates, EMPTY_ROOT, 1, None, None)
            .unwrap();
        let real = adapter
            .calculate_root(&updates, EMPTY_ROOT, 1, None)
            .unwrap();

        assert_eq!(speculative.new_root_hash, real.new_root_hash);
        assert_eq!(speculative.node_batch.len(), real.node_batch.len());
    }

    #[test]
    fn test_speculative_leaves_base_cache_unchanged() {
        let (mut adapter, _) = adapter();
        adapter
            .calculate_root(
                &[(b"warm".to_vec(), keccak512(b"w"))],
                EMPTY_ROOT,
                1,
                None,
            )
            .unwrap();
        let size_before = adapter.cache_len();

        adapter
            .calculate_root_speculative(
                &[(b"spec".to_vec(), keccak512(b"s"))],
                adapter.get_root_hash(1).unwrap(),
                2,
                Some(1),
                None,
            )
            .unwrap();
        assert_eq!(adapter.cache_len(), size_before);
    }

    #[test]
    fn test_speculative_with_injected_parent_nodes() {
        let (mut adapter, _) = adapter();

        // Version 1 exists for real; version 2 only speculatively.
        let v1 = adapter
            .calculate_root(&[(b"x".to_vec(), keccak512(b"1"))], EMPTY_ROOT, 1, None)
            .unwrap();
        let v2 = adapter
            .calculate_root_speculative(
                &[(b"y".to_vec(), keccak512(b"2"))],
                v1.new_root_hash,
                2,
                Some(1),
                None,
            )
            .unwrap();

        // Chain version 3 on the unpersisted version 2 by injecting its
        // node batch.
        let warm: Vec<(Vec<u8>, Vec<u8>)> = v2.serialized_nodes().collect();
        let v3 = adapter
            .calculate_root_speculative(
                &[(b"z".to_vec(), keccak512(b"3"))],
                v2.new_root_hash,
                3,
                Some(2),
                Some(&warm),
            )
            .unwrap();
        assert_ne!(v3.new_root_hash, v2.new_root_hash);

        // Undecodable warm nodes are skipped rather than fatal. With the
        // parent chain lost, version 2 reads as empty and the result
        // diverges from the properly seeded run.
        let junk = vec![(vec![1, 2, 3], vec![4, 5, 6])];
        let degraded = adapter
            .calculate_root_speculative(
                &[(b"z".to_vec(), keccak512(b"3"))],
                v2.new_root_hash,
                3,
                Some(2),
                Some(&junk),
            )
            .unwrap();
        assert_ne!(degraded.new_root_hash, v3.new_root_hash);
    }

    #[test]
    fn test_get_root_hash_prefers_last_flush() {
        let (mut adapter, _) = adapter();
        let batch = adapter
            .calculate_root(&[(b"k".to_vec(), keccak512(b"v"))], EMPTY_ROOT, 7, None)
            .unwrap();
        assert_eq!(adapter.get_root_hash(7).unwrap(), batch.new_root_hash);
        assert_eq!(adapter.get_root_hash(6).unwrap(), EMPTY_ROOT);
    }
}
