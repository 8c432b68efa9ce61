//! Node store contract and the in-memory implementation.
//!
//! The durable backend (write-ahead log, snapshot store) lives outside this
//! crate; the trie engine only needs a synchronous read of the framed bytes
//! for a node key. `MemoryNodeStore` implements the same contract in-process
//! for tests and standalone deployments.

use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use thiserror::Error;

use crate::merkle::{NodeKey, TreeUpdateBatch};

type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// Errors surfaced by a node store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Read-only access to persisted nodes.
///
/// Returns the framed bytes for a `(version, path)` node key, or `None` when
/// no such node exists. Absence is not an error; whether an absent node is a
/// problem depends on who asked (a missing root means an empty version, a
/// missing referenced child means corruption).
pub trait NodeReader: Send + Sync {
    /// Fetches the framed bytes stored under the given key.
    fn get_node_bytes(&self, key: &NodeKey) -> Result<Option<Vec<u8>>, StoreError>;
}

/// A reader over nothing: every lookup misses.
///
/// Useful when the whole working set is expected to stay in the cache, or as
/// the backend for throwaway trees in tests.
#[derive(Debug, Default)]
pub struct EmptyNodeStore;

impl NodeReader for EmptyNodeStore {
    fn get_node_bytes(&self, _key: &NodeKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }
}

/// In-memory node store keyed by the encoded node key.
///
/// Stores exactly what a durable backend would: encoded `NodeKey` bytes
/// mapped to framed node bytes.
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<FastHashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryNodeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists every node of an update batch.
    pub fn apply(&self, batch: &TreeUpdateBatch) {
        let mut nodes = self.nodes.write();
        for (key, bytes) in batch.serialized_nodes() {
            nodes.insert(key, bytes);
        }
    }

    /// Inserts raw `(encoded key, framed bytes)` entries.
    pub fn insert_raw(&self, key: Vec<u8>, value: Vec<u8>) {
        self.nodes.write().insert(key, value);
    }

    /// Returns the number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Returns true if no nodes are stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeReader for MemoryNodeStore {
    fn get_node_bytes(&self, key: &NodeKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.nodes.read().get(&key.encode()).cloned())
    }
}
