//! In-memory B-tree over `(key, data pointer)` entries.
//!
//! Nodes live in a single arena (`Vec<Node>`) and refer to their children by
//! arena index. The tree is built by repeated insertion and then handed to
//! `persist_tree`, which maps arena indices to block pointers.
//!
//! # Splitting
//!
//! A node holding `order - 1` entries is full. Insertion places the new entry
//! in a leaf, then walks back up the descent path splitting every node that
//! has become full: the entry at index `(order - 1) / 2` moves up into the
//! parent, the entries (and children) after it move to a new right sibling.
//! A full root is split under a freshly allocated root, which is the only way
//! the tree grows taller.

use crate::storage::pointer::{DataBlockPointer, KeyPointer};

/// Arena index of a node.
pub type NodeId = usize;

/// Smallest supported order.
pub const MIN_ORDER: usize = 2;

/// Largest order whose nodes still fit one block when persisted.
pub const MAX_ORDER: usize = 12;

/// A B-tree node. Leaf iff it has no children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    entries: Vec<KeyPointer>,
    children: Vec<NodeId>,
}

impl Node {
    /// Entries in ascending key order.
    #[must_use]
    pub fn entries(&self) -> &[KeyPointer] {
        &self.entries
    }

    /// Child arena indices; `entries().len() + 1` of them for internal nodes.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Index of the first entry whose key is `>= key`, or the entry count.
    #[must_use]
    pub fn search_position(&self, key: i32) -> usize {
        search_position(&self.entries, key)
    }
}

/// Index of the first entry whose key is `>= key`, or `entries.len()`.
#[must_use]
pub fn search_position(entries: &[KeyPointer], key: i32) -> usize {
    entries
        .iter()
        .position(|e| key <= e.key())
        .unwrap_or(entries.len())
}

/// Result of a lookup, with the number of nodes touched on the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found {
        pointer: DataBlockPointer,
        blocks_visited: usize,
    },
    NotFound {
        blocks_visited: usize,
    },
}

impl Lookup {
    /// Number of index nodes touched.
    #[must_use]
    pub const fn blocks_visited(&self) -> usize {
        match self {
            Self::Found { blocks_visited, .. } | Self::NotFound { blocks_visited } => {
                *blocks_visited
            }
        }
    }

    /// The data pointer, if the key was found.
    #[must_use]
    pub const fn pointer(&self) -> Option<DataBlockPointer> {
        match self {
            Self::Found { pointer, .. } => Some(*pointer),
            Self::NotFound { .. } => None,
        }
    }
}

/// An arena-backed B-tree of order `m`.
#[derive(Debug, Clone)]
pub struct BTreeIndex {
    order: usize,
    nodes: Vec<Node>,
    root: NodeId,
    len: usize,
}

impl BTreeIndex {
    /// Create an empty tree. The order must be in `MIN_ORDER..=MAX_ORDER`.
    pub fn new(order: usize) -> Result<Self, BTreeError> {
        if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
            return Err(BTreeError::InvalidOrder(order));
        }
        Ok(Self {
            order,
            nodes: vec![Node::default()],
            root: 0,
            len: 0,
        })
    }

    /// Build a tree by inserting every entry in order.
    pub fn from_entries(
        order: usize,
        entries: impl IntoIterator<Item = KeyPointer>,
    ) -> Result<Self, BTreeError> {
        let mut tree = Self::new(order)?;
        for entry in entries {
            tree.insert(entry)?;
        }
        Ok(tree)
    }

    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    /// Arena index of the root.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Number of keys stored.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of nodes in the arena (the number of blocks needed to persist).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All nodes, indexed by `NodeId`.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Number of levels from the root to the leaves.
    #[must_use]
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut current = self.root;
        while let Some(&child) = self.nodes[current].children.first() {
            height += 1;
            current = child;
        }
        height
    }

    /// Insert an entry.
    ///
    /// Fails with `DuplicateKey` if the key is already stored; the tree is
    /// left unchanged in that case.
    pub fn insert(&mut self, entry: KeyPointer) -> Result<(), BTreeError> {
        let key = entry.key();
        let mut path: Vec<(NodeId, usize)> = Vec::new();
        let mut current = self.root;

        let position = loop {
            let node = &self.nodes[current];
            let position = node.search_position(key);
            if node.entries.get(position).is_some_and(|e| e.key() == key) {
                return Err(BTreeError::DuplicateKey(key));
            }
            if node.is_leaf() {
                break position;
            }
            path.push((current, position));
            current = node.children[position];
        };

        self.nodes[current].entries.insert(position, entry);
        self.len += 1;

        while self.is_full(current) {
            if let Some((parent, child_index)) = path.pop() {
                self.split_child(parent, child_index);
                current = parent;
            } else {
                let new_root = self.nodes.len();
                self.nodes.push(Node {
                    entries: Vec::new(),
                    children: vec![current],
                });
                self.root = new_root;
                self.split_child(new_root, 0);
                break;
            }
        }

        Ok(())
    }

    /// Look up a key, counting the nodes visited.
    #[must_use]
    pub fn lookup(&self, key: i32) -> Lookup {
        let mut blocks_visited = 0;
        let mut current = self.root;
        loop {
            blocks_visited += 1;
            let node = &self.nodes[current];
            let position = node.search_position(key);
            if let Some(entry) = node.entries.get(position).filter(|e| e.key() == key) {
                return Lookup::Found {
                    pointer: entry.pointer(),
                    blocks_visited,
                };
            }
            match node.children.get(position) {
                Some(&child) => current = child,
                None => return Lookup::NotFound { blocks_visited },
            }
        }
    }

    fn is_full(&self, id: NodeId) -> bool {
        self.nodes[id].entries.len() >= self.order - 1
    }

    /// Split the full child at `child_index` of `parent`, promoting its
    /// median entry into `parent`.
    fn split_child(&mut self, parent: NodeId, child_index: usize) {
        let median_index = (self.order - 1) / 2;
        let child = self.nodes[parent].children[child_index];

        let node = &mut self.nodes[child];
        let right_entries = node.entries.split_off(median_index + 1);
        let median = node.entries.remove(median_index);
        let right_children = if node.children.is_empty() {
            Vec::new()
        } else {
            node.children.split_off(median_index + 1)
        };

        let right = self.nodes.len();
        self.nodes.push(Node {
            entries: right_entries,
            children: right_children,
        });

        let parent = &mut self.nodes[parent];
        parent.entries.insert(child_index, median);
        parent.children.insert(child_index + 1, right);
    }
}

/// Errors that can occur building or querying a B-tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BTreeError {
    /// Order outside `MIN_ORDER..=MAX_ORDER`.
    InvalidOrder(usize),
    /// The key is already stored.
    DuplicateKey(i32),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOrder(order) => write!(
                f,
                "invalid B-tree order {order} (must be {MIN_ORDER}..={MAX_ORDER})"
            ),
            Self::DuplicateKey(key) => write!(f, "duplicate key {key}"),
        }
    }
}

impl std::error::Error for BTreeError {}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    use super::*;
    use crate::storage::pointer::BlockPointer;

    fn entry(key: i32) -> KeyPointer {
        let block = u16::try_from(key.unsigned_abs() % 4000).expect("block id");
        let slot = u8::try_from(key.unsigned_abs() % 6).expect("slot");
        let block = BlockPointer::new(0, block).expect("block pointer");
        let pointer = DataBlockPointer::new(block, slot).expect("data pointer");
        KeyPointer::new(key, pointer).expect("key pointer")
    }

    fn keys(tree: &BTreeIndex, id: NodeId) -> Vec<i32> {
        tree.nodes()[id].entries().iter().map(KeyPointer::key).collect()
    }

    /// Check structural invariants, returning the depth of every leaf.
    fn check_node(tree: &BTreeIndex, id: NodeId, depth: usize, leaf_depths: &mut Vec<usize>) {
        let node = &tree.nodes()[id];
        let node_keys = keys(tree, id);
        assert!(
            node_keys.windows(2).all(|w| w[0] < w[1]),
            "entries not ascending: {node_keys:?}"
        );
        assert!(node.entries().len() < tree.order());
        if node.is_leaf() {
            leaf_depths.push(depth);
            return;
        }
        assert_eq!(node.children().len(), node.entries().len() + 1);
        for (i, &child) in node.children().iter().enumerate() {
            let child_keys = subtree_keys(tree, child);
            if let Some(&upper) = node_keys.get(i) {
                assert!(child_keys.iter().all(|&k| k < upper));
            }
            if i > 0 {
                let lower = node_keys[i - 1];
                assert!(child_keys.iter().all(|&k| k > lower));
            }
            check_node(tree, child, depth + 1, leaf_depths);
        }
    }

    fn subtree_keys(tree: &BTreeIndex, id: NodeId) -> Vec<i32> {
        let mut out = keys(tree, id);
        for &child in tree.nodes()[id].children() {
            out.extend(subtree_keys(tree, child));
        }
        out
    }

    fn check_invariants(tree: &BTreeIndex) {
        let mut leaf_depths = Vec::new();
        check_node(tree, tree.root(), 1, &mut leaf_depths);
        assert!(
            leaf_depths.iter().all(|&d| d == leaf_depths[0]),
            "leaves at different depths: {leaf_depths:?}"
        );
        assert_eq!(leaf_depths[0], tree.height());
    }

    #[test]
    fn test_invalid_order() {
        assert_eq!(BTreeIndex::new(1).err(), Some(BTreeError::InvalidOrder(1)));
        assert_eq!(BTreeIndex::new(13).err(), Some(BTreeError::InvalidOrder(13)));
        assert!(BTreeIndex::new(2).is_ok());
        assert!(BTreeIndex::new(12).is_ok());
    }

    #[test]
    fn test_empty_tree_lookup() {
        let tree = BTreeIndex::new(5).expect("tree");
        assert!(tree.is_empty());
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.lookup(7), Lookup::NotFound { blocks_visited: 1 });
    }

    #[test]
    fn test_order_five_scenario() {
        let inserted = [29, 41, 44, 62, 46, 49, 27, 76, 91, 30, 100, 47, 34, 53, 9, 45];
        let tree = BTreeIndex::from_entries(5, inserted.iter().map(|&k| entry(k))).expect("tree");

        assert_eq!(tree.len(), 16);
        assert_eq!(tree.height(), 3);
        assert_eq!(tree.node_count(), 8);
        assert_eq!(keys(&tree, tree.root()), vec![49]);

        let root = &tree.nodes()[tree.root()];
        assert_eq!(keys(&tree, root.children()[0]), vec![30, 44]);
        assert_eq!(keys(&tree, root.children()[1]), vec![62]);

        let found = tree.lookup(9);
        assert_eq!(found.pointer(), Some(entry(9).pointer()));
        assert_eq!(found.blocks_visited(), 3);
        assert_eq!(tree.lookup(49).blocks_visited(), 1);
        assert_eq!(tree.lookup(62).blocks_visited(), 2);
        assert_eq!(tree.lookup(1000), Lookup::NotFound { blocks_visited: 3 });

        for key in inserted {
            assert_eq!(tree.lookup(key).pointer(), Some(entry(key).pointer()));
        }
        check_invariants(&tree);
    }

    #[test]
    fn test_order_three_sequential() {
        let tree = BTreeIndex::from_entries(3, (1..=7).map(entry)).expect("tree");
        assert_eq!(tree.height(), 3);
        assert_eq!(keys(&tree, tree.root()), vec![4]);
        assert_eq!(tree.node_count(), 7);
        check_invariants(&tree);
    }

    #[test]
    fn test_order_two_terminates() {
        let tree = BTreeIndex::from_entries(2, (1..=5).map(entry)).expect("tree");
        assert_eq!(tree.len(), 5);
        for key in 1..=5 {
            assert!(matches!(tree.lookup(key), Lookup::Found { .. }));
        }
        assert!(matches!(tree.lookup(6), Lookup::NotFound { .. }));
        check_invariants(&tree);
    }

    #[test]
    fn test_duplicate_key_leaves_pointer_unchanged() {
        let mut tree = BTreeIndex::from_entries(5, (1..=20).map(entry)).expect("tree");
        let nodes_before = tree.node_count();

        let other = KeyPointer::new(
            7,
            DataBlockPointer::new(BlockPointer::new(3, 3).expect("block"), 3).expect("pointer"),
        )
        .expect("key pointer");
        assert_eq!(tree.insert(other), Err(BTreeError::DuplicateKey(7)));

        assert_eq!(tree.lookup(7).pointer(), Some(entry(7).pointer()));
        assert_eq!(tree.len(), 20);
        assert_eq!(tree.node_count(), nodes_before);
    }

    #[test]
    fn test_duplicate_detected_in_internal_node() {
        let inserted = [29, 41, 44, 62, 46, 49, 27, 76, 91, 30, 100, 47, 34, 53, 9, 45];
        let mut tree = BTreeIndex::from_entries(5, inserted.iter().map(|&k| entry(k))).expect("tree");
        // 49 lives in the root.
        assert_eq!(tree.insert(entry(49)), Err(BTreeError::DuplicateKey(49)));
    }

    #[test]
    fn test_negative_keys() {
        let tree = BTreeIndex::from_entries(4, (-10..=10).map(entry)).expect("tree");
        assert!(matches!(tree.lookup(-10), Lookup::Found { .. }));
        assert!(matches!(tree.lookup(0), Lookup::Found { .. }));
        check_invariants(&tree);
    }

    #[test]
    fn test_random_inserts_preserve_invariants() {
        let mut rng = StdRng::seed_from_u64(42);
        for order in [2, 3, 4, 5, 11, 12] {
            let mut inserted: Vec<i32> = (0..300).map(|k| k * 3 - 100).collect();
            inserted.shuffle(&mut rng);

            let tree =
                BTreeIndex::from_entries(order, inserted.iter().map(|&k| entry(k))).expect("tree");
            assert_eq!(tree.len(), inserted.len());
            check_invariants(&tree);

            for &key in &inserted {
                let found = tree.lookup(key);
                assert_eq!(found.pointer(), Some(entry(key).pointer()), "order {order}");
                assert!(found.blocks_visited() <= tree.height());
            }
            assert!(matches!(tree.lookup(1), Lookup::NotFound { .. }));
        }
    }
}
