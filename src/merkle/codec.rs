//! Framed node encoding: a one-byte kind tag followed by the canonical
//! bytes.
//!
//! Decoding is strict: unknown tags, truncated input and trailing bytes are
//! all rejected. Strictness keeps the encoding a bijection between node
//! values and byte strings, which the domain-separated hash relies on.

use thiserror::Error;

use super::node::{Child, InternalNode, LeafNode, Node, HASH_SIZE};

/// Kind tag for internal nodes.
pub const INTERNAL_NODE_TAG: u8 = 0x01;

/// Kind tag for leaf nodes.
pub const LEAF_NODE_TAG: u8 = 0x02;

const CHILD_RECORD_SIZE: usize = HASH_SIZE + 8;
const FRAMED_LEAF_SIZE: usize = 1 + 2 * HASH_SIZE;

/// Errors from framed node decoding.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NodeDecodeError {
    #[error("empty node encoding")]
    Empty,
    #[error("unknown node tag {0:#04x}")]
    UnknownTag(u8),
    #[error("node encoding has wrong length")]
    Length,
}

/// Encodes a node with its kind tag.
pub fn encode_node(node: &Node) -> Vec<u8> {
    let canonical = node.serialize_canonical();
    let mut buffer = Vec::with_capacity(1 + canonical.len());
    buffer.push(match node {
        Node::Internal(_) => INTERNAL_NODE_TAG,
        Node::Leaf(_) => LEAF_NODE_TAG,
    });
    buffer.extend_from_slice(&canonical);
    buffer
}

/// Decodes a framed node.
///
/// The input must be exactly one tag byte plus the canonical encoding: for a
/// leaf that is `1 + 128` bytes, for an internal it is `1 + 2 + n * 72`
/// bytes where `n` is the popcount of the serialized mask.
pub fn decode_node(bytes: &[u8]) -> Result<Node, NodeDecodeError> {
    let (&tag, body) = bytes.split_first().ok_or(NodeDecodeError::Empty)?;
    match tag {
        INTERNAL_NODE_TAG => decode_internal(body).map(Node::Internal),
        LEAF_NODE_TAG => decode_leaf(body).map(Node::Leaf),
        other => Err(NodeDecodeError::UnknownTag(other)),
    }
}

fn decode_internal(body: &[u8]) -> Result<InternalNode, NodeDecodeError> {
    if body.len() < 2 {
        return Err(NodeDecodeError::Length);
    }
    let mask = u16::from_le_bytes(body[0..2].try_into().unwrap());
    let num_children = mask.count_ones() as usize;
    if body.len() != 2 + num_children * CHILD_RECORD_SIZE {
        return Err(NodeDecodeError::Length);
    }

    let mut node = InternalNode::new();
    let mut pos = 2;
    for nibble in 0..16u8 {
        if (mask >> nibble) & 1 == 0 {
            continue;
        }
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&body[pos..pos + HASH_SIZE]);
        pos += HASH_SIZE;
        let version = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;
        node.set_child(nibble, Child::new(hash, version));
    }
    Ok(node)
}

fn decode_leaf(body: &[u8]) -> Result<LeafNode, NodeDecodeError> {
    if body.len() != FRAMED_LEAF_SIZE - 1 {
        return Err(NodeDecodeError::Length);
    }
    let mut key_hash = [0u8; HASH_SIZE];
    key_hash.copy_from_slice(&body[..HASH_SIZE]);
    let mut value_hash = [0u8; HASH_SIZE];
    value_hash.copy_from_slice(&body[HASH_SIZE..]);
    Ok(LeafNode::new(key_hash, value_hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_internal() -> Node {
        let mut node = InternalNode::new();
        node.set_child(0, Child::new([0x11; HASH_SIZE], 3));
        node.set_child(15, Child::new([0x22; HASH_SIZE], 4));
        Node::Internal(node)
    }

    fn sample_leaf() -> Node {
        Node::Leaf(LeafNode::new([0xAA; HASH_SIZE], [0xBB; HASH_SIZE]))
    }

    #[test]
    fn test_leaf_roundtrip() {
        let node = sample_leaf();
        let encoded = encode_node(&node);
        assert_eq!(encoded.len(), FRAMED_LEAF_SIZE);
        assert_eq!(encoded[0], LEAF_NODE_TAG);
        assert_eq!(decode_node(&encoded), Ok(node));
    }

    #[test]
    fn test_internal_roundtrip() {
        let node = sample_internal();
        let encoded = encode_node(&node);
        assert_eq!(encoded.len(), 1 + 2 + 2 * CHILD_RECORD_SIZE);
        assert_eq!(encoded[0], INTERNAL_NODE_TAG);
        assert_eq!(decode_node(&encoded), Ok(node));
    }

    #[test]
    fn test_strict_length_leaf() {
        let encoded = encode_node(&sample_leaf());

        let mut truncated = encoded.clone();
        truncated.pop();
        assert_eq!(decode_node(&truncated), Err(NodeDecodeError::Length));

        let mut extended = encoded;
        extended.push(0xCC);
        assert_eq!(decode_node(&extended), Err(NodeDecodeError::Length));
    }

    #[test]
    fn test_strict_length_internal() {
        let encoded = encode_node(&sample_internal());

        let mut truncated = encoded.clone();
        truncated.pop();
        assert_eq!(decode_node(&truncated), Err(NodeDecodeError::Length));

        let mut extended = encoded;
        extended.push(0xDD);
        assert_eq!(decode_node(&extended), Err(NodeDecodeError::Length));
    }

    #[test]
    fn test_empty_and_unknown_tag() {
        assert_eq!(decode_node(&[]), Err(NodeDecodeError::Empty));
        assert_eq!(decode_node(&[0x03]), Err(NodeDecodeError::UnknownTag(0x03)));
        assert_eq!(decode_node(&[0x00, 0x01]), Err(NodeDecodeError::UnknownTag(0x00)));
    }

    #[test]
    fn test_internal_with_no_mask_bytes() {
        assert_eq!(decode_node(&[INTERNAL_NODE_TAG]), Err(NodeDecodeError::Length));
        assert_eq!(
            decode_node(&[INTERNAL_NODE_TAG, 0x00]),
            Err(NodeDecodeError::Length)
        );
    }

    #[test]
    fn test_mask_and_child_count_must_agree() {
        // Mask claims two children but only one record follows.
        let mut bytes = vec![INTERNAL_NODE_TAG];
        bytes.extend_from_slice(&0b0000_0011u16.to_le_bytes());
        bytes.extend_from_slice(&[0u8; CHILD_RECORD_SIZE]);
        assert_eq!(decode_node(&bytes), Err(NodeDecodeError::Length));
    }
}
