//! Versioned trie engine.
//!
//! `put_value_set` merges a batch of keyed upserts and deletions into a new
//! tree version rooted at a given base, returning the new root commitment
//! and every node minted along the way. Prior versions are never touched:
//! each rewritten path gets fresh `(version, path)` node keys, and untouched
//! subtrees are shared through child references that carry the version that
//! minted them.

use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, trace};

use super::codec::{encode_node, NodeDecodeError};
use super::node::{
    keccak512, Child, Hash, InternalNode, LeafNode, Node, NodeKey, EMPTY_ROOT, HASH_SIZE,
};
use crate::data::{NibblePath, PathError};
use crate::store::{NodeCache, NodeReader, StoreError};

/// Batches above this size are sorted with rayon.
const PARALLEL_SORT_THRESHOLD: usize = 1024;

/// Trie engine errors.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("malformed node encoding: {0}")]
    Malformed(#[from] NodeDecodeError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("corrupted tree: {0}")]
    Corruption(String),
    #[error("duplicate key in batch: {0}")]
    DuplicateKey(String),
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Result type for trie operations.
pub type Result<T> = std::result::Result<T, TreeError>;

/// A keyed upsert (`Some(value_bytes)`) or deletion (`None`).
pub type ValueUpdate = (Hash, Option<Vec<u8>>);

/// Outcome of a batch apply: the new root commitment plus every node minted
/// at the new version.
///
/// The node batch is the unit of durability: consumers persist it atomically
/// together with the root commitment. Order within the batch carries no
/// meaning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeUpdateBatch {
    /// Root hash of the new version; all-zero for the empty tree.
    pub new_root_hash: Hash,
    /// Every node created by the batch, keyed by `(version, path)`.
    pub node_batch: Vec<(NodeKey, Node)>,
}

impl TreeUpdateBatch {
    /// A batch that changes nothing and commits the given root.
    pub fn unchanged(root: Hash) -> Self {
        Self {
            new_root_hash: root,
            node_batch: Vec::new(),
        }
    }

    /// Yields `(encoded node key, framed node bytes)` pairs for the durable
    /// store.
    pub fn serialized_nodes(&self) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> + '_ {
        self.node_batch
            .iter()
            .map(|(key, node)| (key.encode(), encode_node(node)))
    }
}

/// The versioned trie over a node reader and a node cache.
///
/// The engine owns no state of its own: everything it reads comes through
/// the cache or the reader, and everything it writes goes out as a
/// [`TreeUpdateBatch`] (plus cache warm-up on success). Handing it a
/// speculative overlay cache turns any computation into a dry run.
pub struct VersionedTrie {
    reader: Arc<dyn NodeReader>,
    cache: Arc<dyn NodeCache>,
}

/// What became of a subtree after applying its slice of the batch.
enum SubtreeUpdate {
    /// Nothing effective happened; the caller keeps its existing reference.
    Unchanged,
    /// The subtree is now empty.
    Empty,
    /// The subtree is exactly this leaf. Not yet written: the parent decides
    /// the final resting path (a lone leaf is promoted upward).
    Leaf(LeafNode),
    /// An internal node was written at the current path.
    Internal { hash: Hash },
}

/// A child slot of an internal node being rebuilt.
enum ChildState {
    /// Untouched existing child, referenced as-is.
    Kept(Child),
    /// Freshly built leaf, written once its final path is fixed.
    NewLeaf(LeafNode),
    /// Freshly written internal subtree.
    NewInternal { hash: Hash },
}

fn child_outcome(result: SubtreeUpdate, existing: Option<&Child>) -> Option<ChildState> {
    match result {
        SubtreeUpdate::Unchanged => existing.copied().map(ChildState::Kept),
        SubtreeUpdate::Empty => None,
        SubtreeUpdate::Leaf(leaf) => Some(ChildState::NewLeaf(leaf)),
        SubtreeUpdate::Internal { hash } => Some(ChildState::NewInternal { hash }),
    }
}

/// Nodes minted by the batch in flight.
struct ApplyContext {
    version: u64,
    batch: Vec<(NodeKey, Node)>,
}

impl ApplyContext {
    fn emit(&mut self, path: &NibblePath, node: Node) -> Hash {
        let hash = node.hash();
        self.batch.push((NodeKey::new(self.version, path.clone()), node));
        hash
    }
}

#[inline]
fn nibble_at(hash: &Hash, depth: usize) -> u8 {
    let byte = hash[depth / 2];
    if depth % 2 == 0 {
        byte >> 4
    } else {
        byte & 0x0F
    }
}

fn missing_child(key: &NodeKey) -> TreeError {
    TreeError::Corruption(format!(
        "missing node at version {} path {}",
        key.version(),
        key.path().to_hex()
    ))
}

fn short_hex(hash: &Hash) -> String {
    hash.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

impl VersionedTrie {
    /// Creates a trie over the given reader and cache.
    pub fn new(reader: Arc<dyn NodeReader>, cache: Arc<dyn NodeCache>) -> Self {
        Self { reader, cache }
    }

    /// Applies a batch of upserts and deletions on top of the tree rooted at
    /// `base_root`, producing the tree for `version`.
    ///
    /// The batch is sorted by key hash before anything else, so the result
    /// is independent of the input order. Duplicate keys are rejected. An
    /// all-zero `base_root` means the empty tree; a non-zero `base_root`
    /// without an explicit `base_version` assumes `version - 1`.
    ///
    /// On success every minted node is also pushed into the cache. On error
    /// nothing is returned and the cache is left untouched.
    pub fn put_value_set(
        &self,
        mut updates: Vec<ValueUpdate>,
        version: u64,
        base_root: Option<Hash>,
        base_version: Option<u64>,
    ) -> Result<TreeUpdateBatch> {
        if updates.len() > PARALLEL_SORT_THRESHOLD {
            updates.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));
        } else {
            updates.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        }
        for pair in updates.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(TreeError::DuplicateKey(short_hex(&pair[0].0)));
            }
        }

        let base_node = self.resolve_base(version, base_root, base_version)?;
        debug!(version, updates = updates.len(), "applying value set");

        let mut ctx = ApplyContext {
            version,
            batch: Vec::new(),
        };
        let mut path = NibblePath::new();
        let outcome = self.apply_at(&mut ctx, &mut path, base_node.clone(), &updates)?;

        let new_root_hash = match outcome {
            SubtreeUpdate::Empty => EMPTY_ROOT,
            SubtreeUpdate::Internal { hash } => hash,
            SubtreeUpdate::Leaf(leaf) => ctx.emit(&NibblePath::new(), Node::Leaf(leaf)),
            SubtreeUpdate::Unchanged => match base_node {
                // Re-mint the unchanged root so the new version stays
                // addressable at (version, empty path).
                Some(node) => ctx.emit(&NibblePath::new(), node),
                None => EMPTY_ROOT,
            },
        };

        for (key, node) in &ctx.batch {
            self.cache.put(key.clone(), node.clone());
        }
        debug!(
            version,
            nodes = ctx.batch.len(),
            root = %short_hex(&new_root_hash),
            "value set applied"
        );

        Ok(TreeUpdateBatch {
            new_root_hash,
            node_batch: ctx.batch,
        })
    }

    /// Looks up the value hash stored under `key_hash` in the tree at
    /// `version`. Returns `None` for absent keys and unwritten versions.
    pub fn get(&self, key_hash: &Hash, version: u64) -> Result<Option<Hash>> {
        let mut node = match self.load_node(&NodeKey::new_root(version))? {
            Some(node) => node,
            None => return Ok(None),
        };

        let mut path = NibblePath::new();
        let mut depth = 0;
        loop {
            match node {
                Node::Leaf(leaf) => {
                    return Ok((leaf.key_hash == *key_hash).then_some(leaf.value_hash));
                }
                Node::Internal(internal) => {
                    if depth >= 2 * HASH_SIZE {
                        return Err(TreeError::Corruption(
                            "key exhausted below an internal node".into(),
                        ));
                    }
                    let nibble = nibble_at(key_hash, depth);
                    let child = match internal.child(nibble) {
                        Some(child) => *child,
                        None => return Ok(None),
                    };
                    path.push(nibble)?;
                    let key = NodeKey::new(child.version, path.clone());
                    node = self.load_node(&key)?.ok_or_else(|| missing_child(&key))?;
                    depth += 1;
                }
            }
        }
    }

    /// Returns the root hash of the tree at `version`, or the all-zero hash
    /// when that version holds no root node.
    pub fn get_root_hash(&self, version: u64) -> Result<Hash> {
        Ok(self
            .load_node(&NodeKey::new_root(version))?
            .map(|node| node.hash())
            .unwrap_or(EMPTY_ROOT))
    }

    fn resolve_base(
        &self,
        version: u64,
        base_root: Option<Hash>,
        base_version: Option<u64>,
    ) -> Result<Option<Node>> {
        let base = match (base_root, base_version) {
            (Some(root), _) if root == EMPTY_ROOT => None,
            (_, Some(base_version)) => Some(base_version),
            (Some(_), None) => version.checked_sub(1),
            (None, None) => None,
        };
        match base {
            Some(base_version) => self.load_node(&NodeKey::new_root(base_version)),
            None => Ok(None),
        }
    }

    /// Reads a node through the cache, falling back to the reader.
    fn load_node(&self, key: &NodeKey) -> Result<Option<Node>> {
        if let Some(node) = self.cache.get(key) {
            return Ok(Some(node));
        }
        let Some(bytes) = self.reader.get_node_bytes(key)? else {
            return Ok(None);
        };
        trace!(version = key.version(), path = %key.path().to_hex(), "node read through");
        let node = decode_stored(key, &bytes)?;
        self.cache.put(key.clone(), node.clone());
        Ok(Some(node))
    }

    fn apply_at(
        &self,
        ctx: &mut ApplyContext,
        path: &mut NibblePath,
        node: Option<Node>,
        updates: &[ValueUpdate],
    ) -> Result<SubtreeUpdate> {
        if updates.is_empty() {
            return Ok(SubtreeUpdate::Unchanged);
        }
        match node {
            None => self.build_from_updates(ctx, path, updates),
            Some(Node::Leaf(leaf)) => self.apply_to_leaf(ctx, path, &leaf, updates),
            Some(Node::Internal(internal)) => {
                self.apply_to_internal(ctx, path, &internal, updates)
            }
        }
    }

    /// Builds a subtree where the base holds nothing. Deletions are no-ops.
    fn build_from_updates(
        &self,
        ctx: &mut ApplyContext,
        path: &mut NibblePath,
        updates: &[ValueUpdate],
    ) -> Result<SubtreeUpdate> {
        let leaves: Vec<LeafNode> = updates
            .iter()
            .filter_map(|(key, value)| {
                value.as_ref().map(|v| LeafNode::new(*key, keccak512(v)))
            })
            .collect();
        match leaves.len() {
            0 => Ok(SubtreeUpdate::Empty),
            1 => Ok(SubtreeUpdate::Leaf(leaves.into_iter().next().unwrap())),
            _ => self.build_from_leaves(ctx, path, &leaves),
        }
    }

    /// Builds the subtree holding two or more concrete leaves, splitting by
    /// nibble until they diverge.
    fn build_from_leaves(
        &self,
        ctx: &mut ApplyContext,
        path: &mut NibblePath,
        leaves: &[LeafNode],
    ) -> Result<SubtreeUpdate> {
        let depth = path.len();
        let mut children = Vec::new();

        let mut start = 0;
        while start < leaves.len() {
            let nibble = nibble_at(&leaves[start].key_hash, depth);
            let mut end = start + 1;
            while end < leaves.len() && nibble_at(&leaves[end].key_hash, depth) == nibble {
                end += 1;
            }

            let state = if end - start == 1 {
                ChildState::NewLeaf(leaves[start].clone())
            } else {
                path.push(nibble)?;
                let result = self.build_from_leaves(ctx, path, &leaves[start..end])?;
                path.pop();
                match child_outcome(result, None) {
                    Some(state) => state,
                    None => {
                        start = end;
                        continue;
                    }
                }
            };
            children.push((nibble, state));
            start = end;
        }

        self.finalize_children(ctx, path, children)
    }

    /// Applies updates to a subtree consisting of a single existing leaf.
    fn apply_to_leaf(
        &self,
        ctx: &mut ApplyContext,
        path: &mut NibblePath,
        existing: &LeafNode,
        updates: &[ValueUpdate],
    ) -> Result<SubtreeUpdate> {
        // Every update targets the existing key: replace or delete in place.
        if updates.iter().all(|(key, _)| *key == existing.key_hash) {
            let (_, value) = &updates[0];
            return Ok(match value {
                Some(v) => {
                    SubtreeUpdate::Leaf(LeafNode::new(existing.key_hash, keccak512(v)))
                }
                None => SubtreeUpdate::Empty,
            });
        }

        let touches_existing = updates.iter().any(|(key, _)| *key == existing.key_hash);
        let has_upsert = updates.iter().any(|(_, value)| value.is_some());
        if !has_upsert && !touches_existing {
            // Only deletions of keys this subtree never held.
            return Ok(SubtreeUpdate::Unchanged);
        }

        // Merge the existing leaf into the update set as one more entry on
        // its own key, then rebuild from the surviving leaves.
        let mut survivor = Some(existing.clone());
        let mut leaves: Vec<LeafNode> = Vec::with_capacity(updates.len() + 1);
        for (key, value) in updates {
            if *key == existing.key_hash {
                survivor = value
                    .as_ref()
                    .map(|v| LeafNode::new(*key, keccak512(v)));
            } else if let Some(v) = value {
                leaves.push(LeafNode::new(*key, keccak512(v)));
            }
        }
        if let Some(survivor) = survivor {
            let pos = leaves
                .binary_search_by(|leaf| leaf.key_hash.cmp(&survivor.key_hash))
                .unwrap_err();
            leaves.insert(pos, survivor);
        }

        match leaves.len() {
            0 => Ok(SubtreeUpdate::Empty),
            1 => Ok(SubtreeUpdate::Leaf(leaves.into_iter().next().unwrap())),
            _ => self.build_from_leaves(ctx, path, &leaves),
        }
    }

    /// Applies updates below an existing internal node, partitioning the
    /// sorted batch by the nibble at the current depth.
    fn apply_to_internal(
        &self,
        ctx: &mut ApplyContext,
        path: &mut NibblePath,
        internal: &InternalNode,
        updates: &[ValueUpdate],
    ) -> Result<SubtreeUpdate> {
        let depth = path.len();
        let mut children = Vec::with_capacity(internal.child_count());
        let mut changed = false;

        let mut cursor = 0;
        for nibble in 0..16u8 {
            let start = cursor;
            while cursor < updates.len() && nibble_at(&updates[cursor].0, depth) == nibble {
                cursor += 1;
            }
            let partition = &updates[start..cursor];
            let existing = internal.child(nibble).copied();

            if partition.is_empty() {
                if let Some(child) = existing {
                    children.push((nibble, ChildState::Kept(child)));
                }
                continue;
            }

            let sub_node = match existing {
                Some(child) => {
                    path.push(nibble)?;
                    let key = NodeKey::new(child.version, path.clone());
                    let node = self.load_node(&key)?.ok_or_else(|| missing_child(&key))?;
                    path.pop();
                    Some(node)
                }
                None => None,
            };

            path.push(nibble)?;
            let result = self.apply_at(ctx, path, sub_node, partition)?;
            path.pop();

            match child_outcome(result, existing.as_ref()) {
                Some(state) => {
                    if !matches!(state, ChildState::Kept(_)) {
                        changed = true;
                    }
                    children.push((nibble, state));
                }
                None => {
                    if existing.is_some() {
                        changed = true;
                    }
                }
            }
        }

        if !changed {
            return Ok(SubtreeUpdate::Unchanged);
        }
        self.finalize_children(ctx, path, children)
    }

    /// Turns the rebuilt child set into the final subtree node.
    ///
    /// Zero children collapse to empty. A lone leaf is promoted to the
    /// parent path instead of sitting under a chain of internals; a lone
    /// internal child stays put, because its stored subtree embeds its own
    /// paths and cannot move.
    fn finalize_children(
        &self,
        ctx: &mut ApplyContext,
        path: &mut NibblePath,
        children: Vec<(u8, ChildState)>,
    ) -> Result<SubtreeUpdate> {
        if children.is_empty() {
            return Ok(SubtreeUpdate::Empty);
        }

        if children.len() == 1 {
            let (nibble, state) = children.into_iter().next().unwrap();
            return match state {
                ChildState::NewLeaf(leaf) => Ok(SubtreeUpdate::Leaf(leaf)),
                ChildState::NewInternal { hash } => {
                    let node =
                        InternalNode::from_children([(nibble, Child::new(hash, ctx.version))]);
                    let hash = ctx.emit(path, node.into());
                    Ok(SubtreeUpdate::Internal { hash })
                }
                ChildState::Kept(child) => {
                    path.push(nibble)?;
                    let key = NodeKey::new(child.version, path.clone());
                    let node = self.load_node(&key)?.ok_or_else(|| missing_child(&key))?;
                    path.pop();
                    match node {
                        Node::Leaf(leaf) => Ok(SubtreeUpdate::Leaf(leaf)),
                        Node::Internal(_) => {
                            let node = InternalNode::from_children([(nibble, child)]);
                            let hash = ctx.emit(path, node.into());
                            Ok(SubtreeUpdate::Internal { hash })
                        }
                    }
                }
            };
        }

        let mut node = InternalNode::new();
        for (nibble, state) in children {
            let child = match state {
                ChildState::Kept(child) => child,
                ChildState::NewInternal { hash } => Child::new(hash, ctx.version),
                ChildState::NewLeaf(leaf) => {
                    path.push(nibble)?;
                    let hash = ctx.emit(path, Node::Leaf(leaf));
                    path.pop();
                    Child::new(hash, ctx.version)
                }
            };
            node.set_child(nibble, child);
        }
        let hash = ctx.emit(path, node.into());
        Ok(SubtreeUpdate::Internal { hash })
    }
}

fn decode_stored(key: &NodeKey, bytes: &[u8]) -> Result<Node> {
    super::codec::decode_node(bytes).map_err(|err| {
        TreeError::Corruption(format!(
            "undecodable node at version {} path {}: {err}",
            key.version(),
            key.path().to_hex()
        ))
    })
}
