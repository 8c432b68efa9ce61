//! Core data structures for trie navigation.

mod child_map;
mod nibble_path;


pub use child_map::SparseChildMap;
pub use nibble_path::{NibblePath, PathError};
