//! Trie node types, canonical encodings and domain-separated hashing.

use tiny_keccak::{Hasher, Keccak};

use crate::data::{NibblePath, SparseChildMap};

/// Hash size in bytes (Keccak-512).
pub const HASH_SIZE: usize = 64;

/// A node, key or value hash.
pub type Hash = [u8; HASH_SIZE];

/// Root hash of the empty tree.
pub const EMPTY_ROOT: Hash = [0u8; HASH_SIZE];

/// Domain separator prepended to internal node bytes before hashing.
pub const INTERNAL_NODE_DOMAIN: &[u8] = b"VMTRIE_InternalNode_V2";

/// Domain separator prepended to leaf node bytes before hashing.
pub const LEAF_NODE_DOMAIN: &[u8] = b"VMTRIE_LeafNode_V2";

/// Computes the Keccak-512 hash of data.
pub fn keccak512(data: &[u8]) -> Hash {
    let mut hasher = Keccak::v512();
    hasher.update(data);
    let mut hash = [0u8; HASH_SIZE];
    hasher.finalize(&mut hash);
    hash
}

fn domain_separated_hash(domain: &[u8], canonical: &[u8]) -> Hash {
    let mut hasher = Keccak::v512();
    hasher.update(domain);
    hasher.update(canonical);
    let mut hash = [0u8; HASH_SIZE];
    hasher.finalize(&mut hash);
    hash
}

/// Reference to a child subtree: its hash and the version that minted it.
///
/// The version is part of the reference because nodes are addressed by
/// `(version, path)`: to load this child you ask the store for the node at
/// `(child.version, parent_path + nibble)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Child {
    /// Domain-separated hash of the child node.
    pub hash: Hash,
    /// Version at which the child node was created or last rewritten.
    pub version: u64,
}

impl Child {
    /// Creates a new child reference.
    pub fn new(hash: Hash, version: u64) -> Self {
        Self { hash, version }
    }
}

/// Internal node: a sparse map from nibble to child reference.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InternalNode {
    children: SparseChildMap<Child>,
}

impl InternalNode {
    /// Creates an internal node with no children.
    pub fn new() -> Self {
        Self {
            children: SparseChildMap::new(),
        }
    }

    /// Creates an internal node from `(nibble, child)` pairs.
    pub fn from_children(children: impl IntoIterator<Item = (u8, Child)>) -> Self {
        Self {
            children: children.into_iter().collect(),
        }
    }

    /// Returns the child at the given nibble, if present.
    pub fn child(&self, nibble: u8) -> Option<&Child> {
        self.children.get(nibble)
    }

    /// Inserts or replaces the child at the given nibble.
    pub fn set_child(&mut self, nibble: u8, child: Child) {
        self.children.set(nibble, child);
    }

    /// Returns the number of children.
    pub fn child_count(&self) -> usize {
        self.children.child_count()
    }

    /// Returns true if the node has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Returns the raw presence mask.
    pub fn raw_mask(&self) -> u16 {
        self.children.raw_mask()
    }

    /// Iterates over `(nibble, child)` pairs in ascending nibble order.
    pub fn children(&self) -> impl Iterator<Item = (u8, &Child)> {
        self.children.iter()
    }

    /// Canonical encoding: 2-byte little-endian mask, then one
    /// `hash || version` record per child in ascending nibble order.
    pub fn serialize_canonical(&self) -> Vec<u8> {
        const CHILD_RECORD_SIZE: usize = HASH_SIZE + 8;
        let mut buffer = Vec::with_capacity(2 + self.child_count() * CHILD_RECORD_SIZE);
        buffer.extend_from_slice(&self.children.raw_mask().to_le_bytes());
        for (_, child) in self.children.iter() {
            buffer.extend_from_slice(&child.hash);
            buffer.extend_from_slice(&child.version.to_le_bytes());
        }
        buffer
    }

    /// Domain-separated hash of the node.
    pub fn hash(&self) -> Hash {
        domain_separated_hash(INTERNAL_NODE_DOMAIN, &self.serialize_canonical())
    }
}

/// Leaf node: the full key hash plus the hash of the stored value.
///
/// The raw value never enters the tree; callers get the value hash back from
/// lookups and resolve the payload elsewhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafNode {
    /// Hash of the account key this leaf represents.
    pub key_hash: Hash,
    /// Hash of the value bytes stored under the key.
    pub value_hash: Hash,
}

impl LeafNode {
    /// Creates a new leaf node.
    pub fn new(key_hash: Hash, value_hash: Hash) -> Self {
        Self {
            key_hash,
            value_hash,
        }
    }

    /// Canonical encoding: `key_hash || value_hash`.
    pub fn serialize_canonical(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(2 * HASH_SIZE);
        buffer.extend_from_slice(&self.key_hash);
        buffer.extend_from_slice(&self.value_hash);
        buffer
    }

    /// Domain-separated hash of the node.
    pub fn hash(&self) -> Hash {
        domain_separated_hash(LEAF_NODE_DOMAIN, &self.serialize_canonical())
    }
}

/// A node in the trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// Internal node with up to 16 children.
    Internal(InternalNode),
    /// Leaf node holding a key/value-hash pair.
    Leaf(LeafNode),
}

impl Node {
    /// Canonical (untagged) encoding of the node.
    pub fn serialize_canonical(&self) -> Vec<u8> {
        match self {
            Node::Internal(internal) => internal.serialize_canonical(),
            Node::Leaf(leaf) => leaf.serialize_canonical(),
        }
    }

    /// Domain-separated hash of the node.
    pub fn hash(&self) -> Hash {
        match self {
            Node::Internal(internal) => internal.hash(),
            Node::Leaf(leaf) => leaf.hash(),
        }
    }
}

impl From<InternalNode> for Node {
    fn from(node: InternalNode) -> Self {
        Node::Internal(node)
    }
}

impl From<LeafNode> for Node {
    fn from(node: LeafNode) -> Self {
        Node::Leaf(node)
    }
}

/// Primary key of a node in the store: the version that minted it plus its
/// position in the trie.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    version: u64,
    path: NibblePath,
}

impl NodeKey {
    /// Creates a node key.
    pub fn new(version: u64, path: NibblePath) -> Self {
        Self { version, path }
    }

    /// Creates the root key for a version (empty path).
    pub fn new_root(version: u64) -> Self {
        Self {
            version,
            path: NibblePath::new(),
        }
    }

    /// Returns the version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the path.
    pub fn path(&self) -> &NibblePath {
        &self.path
    }

    /// Encodes the key: 8 little-endian version bytes, 4 little-endian
    /// nibble-count bytes, then the packed path bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(12 + self.path.bytes().len());
        buffer.extend_from_slice(&self.version.to_le_bytes());
        buffer.extend_from_slice(&(self.path.len() as u32).to_le_bytes());
        buffer.extend_from_slice(self.path.bytes());
        buffer
    }

    /// Decodes a key produced by [`encode`]. Returns `None` on truncated or
    /// oversized input.
    ///
    /// [`encode`]: NodeKey::encode
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 12 {
            return None;
        }
        let version = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let num_nibbles = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        if bytes.len() != 12 + num_nibbles.div_ceil(2) {
            return None;
        }
        let path = NibblePath::from_packed(&bytes[12..], num_nibbles);
        Some(Self { version, path })
    }
}
