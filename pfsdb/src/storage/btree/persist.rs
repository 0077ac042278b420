//! Moving a B-tree between memory and the paged store.
//!
//! `persist_tree` writes an in-memory tree in three passes: allocate one
//! block per arena node, render each node with its children's arena indices
//! replaced by the allocated block pointers, then write and persist. The
//! block pointer of the root becomes the file's index root.
//!
//! `search` answers equality lookups straight from the persisted blocks.

use std::collections::{HashSet, VecDeque};

use crate::storage::block::{BLOCK_SIZE, Block};
use crate::storage::btree::node::{NodeError, parse_node, render_node, rendered_width};
use crate::storage::btree::tree::{BTreeIndex, Lookup, search_position};
use crate::storage::file::StoreError;
use crate::storage::pointer::BlockPointer;
use crate::storage::store_set::StoreSet;

/// Write a tree into newly allocated blocks and return the root's pointer.
pub fn persist_tree(tree: &BTreeIndex, stores: &mut StoreSet) -> Result<BlockPointer, IndexError> {
    if rendered_width(tree.order()) > BLOCK_SIZE {
        return Err(IndexError::Node(NodeError::UnsupportedOrder(tree.order())));
    }

    // Pass 1: one block per arena node.
    let pointers = stores.allocate_blocks(tree.node_count())?;

    // Pass 2: render with arena indices resolved to block pointers.
    let mut rendered: Vec<Block> = Vec::with_capacity(pointers.len());
    for node in tree.nodes() {
        let children = node
            .children()
            .iter()
            .map(|&child| {
                pointers
                    .get(child)
                    .copied()
                    .ok_or(IndexError::UnresolvedChild(child))
            })
            .collect::<Result<Vec<_>, _>>()?;
        rendered.push(render_node(node, tree.order(), &children)?);
    }

    // Pass 3: write and persist.
    for (pointer, block) in pointers.iter().zip(&rendered) {
        stores.write_block(*pointer, block.as_bytes())?;
    }
    stores.persist_all()?;

    let root = pointers
        .get(tree.root())
        .copied()
        .ok_or(IndexError::UnresolvedChild(tree.root()))?;

    tracing::debug!(
        "Persisted index of {} keys in {} blocks, root at {}",
        tree.len(),
        pointers.len(),
        root
    );

    Ok(root)
}

/// Look up a key in a persisted index, counting the index blocks read.
pub fn search(stores: &StoreSet, root: BlockPointer, key: i32) -> Result<Lookup, IndexError> {
    let mut blocks_visited = 0;
    let mut current = root;
    let mut seen = HashSet::new();

    loop {
        if !seen.insert(current) {
            return Err(IndexError::Cycle(current));
        }
        blocks_visited += 1;

        let node = parse_node(stores.read_block(current)?)?;
        let position = search_position(&node.entries, key);
        if let Some(entry) = node.entries.get(position).filter(|e| e.key() == key) {
            return Ok(Lookup::Found {
                pointer: entry.pointer(),
                blocks_visited,
            });
        }
        match node.children.get(position) {
            Some(&child) => current = child,
            None => return Ok(Lookup::NotFound { blocks_visited }),
        }
    }
}

/// Every block reachable from an index root, in breadth-first order.
pub fn index_blocks(stores: &StoreSet, root: BlockPointer) -> Result<Vec<BlockPointer>, IndexError> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);

    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        let node = parse_node(stores.read_block(current)?)?;
        queue.extend(node.children);
        order.push(current);
    }

    Ok(order)
}

/// Errors that can occur persisting or searching an index.
#[derive(Debug)]
pub enum IndexError {
    /// Paged store error.
    Store(StoreError),
    /// Node layout error.
    Node(NodeError),
    /// A child reference has no allocated block.
    UnresolvedChild(usize),
    /// The persisted index links back to a block already visited.
    Cycle(BlockPointer),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::UnresolvedChild(id) => write!(f, "node {id} has no allocated block"),
            Self::Cycle(pointer) => write!(f, "index revisits block {pointer}"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::UnresolvedChild(_) | Self::Cycle(_) => None,
        }
    }
}

impl From<StoreError> for IndexError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<NodeError> for IndexError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::storage::pointer::{DataBlockPointer, KeyPointer};

    const SCENARIO: [i32; 16] = [29, 41, 44, 62, 46, 49, 27, 76, 91, 30, 100, 47, 34, 53, 9, 45];

    fn entry(key: i32) -> KeyPointer {
        let block = u16::try_from(key.unsigned_abs() % 4000).expect("block id");
        let pointer = DataBlockPointer::new(BlockPointer::new(1, block).expect("block"), 4)
            .expect("data pointer");
        KeyPointer::new(key, pointer).expect("key pointer")
    }

    #[test]
    fn test_persist_and_search_scenario() {
        let dir = tempdir().expect("create temp dir");
        let mut stores = StoreSet::create(dir.path(), "index", 100).expect("create");
        let tree = BTreeIndex::from_entries(5, SCENARIO.map(entry)).expect("tree");

        let root = persist_tree(&tree, &mut stores).expect("persist");
        assert_eq!(stores.free_count(), 94 - tree.node_count());

        for key in SCENARIO {
            let persisted = search(&stores, root, key).expect("search");
            assert_eq!(persisted, tree.lookup(key), "key {key}");
        }
        let nine = search(&stores, root, 9).expect("search");
        assert_eq!(nine.blocks_visited(), 3);
        assert_eq!(
            search(&stores, root, 1000).expect("search"),
            Lookup::NotFound { blocks_visited: 3 }
        );
    }

    #[test]
    fn test_root_pointer_is_arena_root() {
        let dir = tempdir().expect("create temp dir");
        let mut stores = StoreSet::create(dir.path(), "index", 100).expect("create");
        let tree = BTreeIndex::from_entries(5, SCENARIO.map(entry)).expect("tree");

        let root = persist_tree(&tree, &mut stores).expect("persist");
        // Blocks are handed out in arena order starting at block 6.
        let expected = u16::try_from(6 + tree.root()).expect("block id");
        assert_eq!(root, BlockPointer::new(0, expected).expect("pointer"));

        let root_node = parse_node(stores.read_block(root).expect("read")).expect("parse");
        assert_eq!(root_node.entries.len(), 1);
        assert_eq!(root_node.entries[0].key(), 49);
        assert_eq!(root_node.children.len(), 2);
    }

    #[test]
    fn test_persist_survives_reopen() {
        let dir = tempdir().expect("create temp dir");
        let root = {
            let mut stores = StoreSet::create(dir.path(), "index", 100).expect("create");
            let tree = BTreeIndex::from_entries(11, (1..=200).map(entry)).expect("tree");
            persist_tree(&tree, &mut stores).expect("persist")
        };

        let stores = StoreSet::open(dir.path(), "index").expect("open");
        for key in [1, 57, 200] {
            let found = search(&stores, root, key).expect("search");
            assert_eq!(found.pointer(), Some(entry(key).pointer()));
        }
    }

    #[test]
    fn test_persist_spills_into_new_file() {
        let dir = tempdir().expect("create temp dir");
        let mut stores = StoreSet::create(dir.path(), "index", 8).expect("create");
        let tree = BTreeIndex::from_entries(3, (1..=10).map(entry)).expect("tree");
        assert!(tree.node_count() > 2);

        let root = persist_tree(&tree, &mut stores).expect("persist");
        assert!(stores.file_count() > 1);
        for key in 1..=10 {
            assert!(matches!(
                search(&stores, root, key).expect("search"),
                Lookup::Found { .. }
            ));
        }
    }

    #[test]
    fn test_index_blocks_visits_every_node() {
        let dir = tempdir().expect("create temp dir");
        let mut stores = StoreSet::create(dir.path(), "index", 100).expect("create");
        let tree = BTreeIndex::from_entries(5, SCENARIO.map(entry)).expect("tree");
        let root = persist_tree(&tree, &mut stores).expect("persist");

        let blocks = index_blocks(&stores, root).expect("walk");
        assert_eq!(blocks.len(), tree.node_count());
        assert_eq!(blocks[0], root);
    }

    #[test]
    fn test_search_detects_cycle() {
        let dir = tempdir().expect("create temp dir");
        let mut stores = StoreSet::create(dir.path(), "index", 100).expect("create");
        let pointer = BlockPointer::new(0, 6).expect("pointer");
        let encoded = format!("{pointer}{}{pointer}", entry(5));
        let mut block = Block::new();
        block.write_bytes(0, encoded.as_bytes());
        stores
            .write_block(pointer, block.as_bytes())
            .expect("write");

        assert!(matches!(
            search(&stores, pointer, 10),
            Err(IndexError::Cycle(_))
        ));
    }
}
