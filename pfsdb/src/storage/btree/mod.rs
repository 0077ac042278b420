//! B-tree index over record keys.
//!
//! This module provides the per-file primary index: an in-memory B-tree of
//! order `m` built during bulk load, and the routines that persist it one node
//! per block and search it on disk.
//!
//! # Structure
//!
//! - Internal nodes: `k` entries and `k + 1` children
//! - Leaf nodes: entries only
//!
//! Every entry is a `KeyPointer`: a 7-char key plus the 8-char data pointer of
//! the record carrying that key.
//!
//! # Usage
//!
//! ```
//! use pfsdb::storage::btree::BTreeIndex;
//! use pfsdb::storage::pointer::{BlockPointer, DataBlockPointer, KeyPointer};
//!
//! let block = BlockPointer::new(0, 6).unwrap();
//! let mut tree = BTreeIndex::new(5).unwrap();
//! for (slot, key) in [30, 10, 20].into_iter().enumerate() {
//!     let pointer = DataBlockPointer::new(block, slot as u8).unwrap();
//!     tree.insert(KeyPointer::new(key, pointer).unwrap()).unwrap();
//! }
//!
//! let found = tree.lookup(20);
//! assert_eq!(found.pointer().map(|p| p.slot()), Some(2));
//! assert_eq!(found.blocks_visited(), 1);
//! ```

mod node;
mod persist;
mod tree;

pub use node::{PAIR_WIDTH, PersistedNode, NodeError, parse_node, render_node, rendered_width};
pub use persist::{IndexError, index_blocks, persist_tree, search};
pub use tree::{BTreeError, BTreeIndex, Lookup, MAX_ORDER, MIN_ORDER, Node, NodeId, search_position};
