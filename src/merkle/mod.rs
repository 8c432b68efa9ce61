//! Node model, canonical encodings and the versioned trie engine.
//!
//! Nodes hash under per-kind domain separators over a strict canonical
//! encoding, so a root hash commits unambiguously to the whole tree.

mod codec;
mod node;
mod tree;


pub use codec::{decode_node, encode_node, NodeDecodeError, INTERNAL_NODE_TAG, LEAF_NODE_TAG};
pub use node::{
    keccak512, Child, Hash, InternalNode, LeafNode, Node, NodeKey, EMPTY_ROOT, HASH_SIZE,
    INTERNAL_NODE_DOMAIN, LEAF_NODE_DOMAIN,
};
pub use tree::{Result, TreeError, TreeUpdateBatch, ValueUpdate, VersionedTrie};
