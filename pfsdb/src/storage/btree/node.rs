//! On-disk layout of B-tree nodes.
//!
//! A persisted node of an order-`m` tree occupies one block:
//!
//! ```text
//! [child 0][entry 0][child 1][entry 1] ... [child m-2][entry m-2][child m-1]
//! ```
//!
//! Each child is a 7-char `BlockPointer` and each entry a 15-char
//! `KeyPointer`. Every slot is always written, so all nodes of a tree have the
//! same width: missing children hold the sentinel and missing entries hold the
//! empty-slot key pointer. The rest of the block is blank.
//!
//! Parsing does not need the order: it reads pairs until it meets blank
//! space or the end of the block.

use crate::storage::block::{BLOCK_SIZE, Block, FILL_BYTE};
use crate::storage::btree::tree::{MAX_ORDER, MIN_ORDER, Node};
use crate::storage::pointer::{
    BLOCK_POINTER_WIDTH, BlockPointer, CodecError, KEY_POINTER_WIDTH, KeyPointer,
};

/// Width of one `[child][entry]` pair.
pub const PAIR_WIDTH: usize = BLOCK_POINTER_WIDTH + KEY_POINTER_WIDTH;

/// Width of a rendered node of the given order.
#[must_use]
pub const fn rendered_width(order: usize) -> usize {
    (order - 1) * PAIR_WIDTH + BLOCK_POINTER_WIDTH
}

/// A node as read back from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedNode {
    /// Entries in stored order.
    pub entries: Vec<KeyPointer>,
    /// Child block pointers; empty for a leaf.
    pub children: Vec<BlockPointer>,
}

impl PersistedNode {
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Render a node into a block.
///
/// `children` holds the resolved block pointer of each of the node's
/// children, in order.
pub fn render_node(
    node: &Node,
    order: usize,
    children: &[BlockPointer],
) -> Result<Block, NodeError> {
    if !(MIN_ORDER..=MAX_ORDER).contains(&order) || rendered_width(order) > BLOCK_SIZE {
        return Err(NodeError::UnsupportedOrder(order));
    }
    if node.entries().len() > order - 1 {
        return Err(NodeError::TooManyEntries {
            entries: node.entries().len(),
            order,
        });
    }
    if children.len() != node.children().len() {
        return Err(NodeError::ChildCountMismatch {
            expected: node.children().len(),
            actual: children.len(),
        });
    }

    let empty_entry = KeyPointer::empty_slot();
    let mut block = Block::new();
    let mut offset = 0;
    for slot in 0..order {
        let child = BlockPointer::encode_optional(children.get(slot).copied());
        block.write_bytes(offset, child.as_bytes());
        offset += BLOCK_POINTER_WIDTH;

        if slot + 1 < order {
            let entry = node
                .entries()
                .get(slot)
                .map_or_else(|| empty_entry.clone(), ToString::to_string);
            block.write_bytes(offset, entry.as_bytes());
            offset += KEY_POINTER_WIDTH;
        }
    }
    Ok(block)
}

/// Parse a persisted node.
pub fn parse_node(block: &Block) -> Result<PersistedNode, NodeError> {
    let mut node = PersistedNode::default();
    let mut offset = 0;

    loop {
        let Some(child) = field(block, offset, BLOCK_POINTER_WIDTH) else {
            break;
        };
        if let Some(pointer) = BlockPointer::decode_optional(child)? {
            node.children.push(pointer);
        }
        offset += BLOCK_POINTER_WIDTH;

        let Some(entry) = field(block, offset, KEY_POINTER_WIDTH) else {
            break;
        };
        if let Some(entry) = KeyPointer::decode_optional(entry)? {
            node.entries.push(entry);
        }
        offset += KEY_POINTER_WIDTH;
    }

    if !node.children.is_empty() && node.children.len() != node.entries.len() + 1 {
        return Err(NodeError::ChildCountMismatch {
            expected: node.entries.len() + 1,
            actual: node.children.len(),
        });
    }
    Ok(node)
}

/// The field at `offset`, or `None` at the end of the block or blank padding.
fn field(block: &Block, offset: usize, width: usize) -> Option<&str> {
    if offset + width > BLOCK_SIZE {
        return None;
    }
    let bytes = block.read_bytes(offset, width);
    if bytes.iter().all(|&b| b == FILL_BYTE) {
        return None;
    }
    Some(block.read_str(offset, width))
}

/// Errors that can occur rendering or parsing a persisted node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// A pointer field could not be decoded.
    Codec(CodecError),
    /// The order's nodes do not fit one block.
    UnsupportedOrder(usize),
    /// More entries than slots.
    TooManyEntries { entries: usize, order: usize },
    /// Internal node without exactly one more child than entries.
    ChildCountMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::UnsupportedOrder(order) => {
                write!(f, "nodes of order {order} do not fit a {BLOCK_SIZE}-byte block")
            }
            Self::TooManyEntries { entries, order } => {
                write!(f, "{entries} entries do not fit a node of order {order}")
            }
            Self::ChildCountMismatch { expected, actual } => {
                write!(f, "expected {expected} children, found {actual}")
            }
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::UnsupportedOrder(_)
            | Self::TooManyEntries { .. }
            | Self::ChildCountMismatch { .. } => None,
        }
    }
}

impl From<CodecError> for NodeError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::tree::BTreeIndex;
    use crate::storage::pointer::DataBlockPointer;

    fn entry(key: i32, block: u16) -> KeyPointer {
        let pointer = DataBlockPointer::new(BlockPointer::new(0, block).expect("block"), 2)
            .expect("data pointer");
        KeyPointer::new(key, pointer).expect("key pointer")
    }

    #[test]
    fn test_rendered_width() {
        assert_eq!(rendered_width(2), 29);
        assert_eq!(rendered_width(5), 95);
        assert_eq!(rendered_width(12), 249);
        assert!(rendered_width(13) > BLOCK_SIZE);
    }

    #[test]
    fn test_render_leaf_pads_with_sentinels() {
        let tree = BTreeIndex::from_entries(3, [entry(10, 6)]).expect("tree");
        let block = render_node(&tree.nodes()[tree.root()], 3, &[]).expect("render");

        let expected = format!(
            "9999999{}9999999{}9999999",
            entry(10, 6),
            KeyPointer::empty_slot()
        );
        assert_eq!(block.read_str(0, expected.len()), expected);
        assert_eq!(block.read_str(expected.len(), 5), "     ");
    }

    #[test]
    fn test_render_and_parse_internal_node() {
        let tree = BTreeIndex::from_entries(3, (1..=3).map(|k| entry(k, 10))).expect("tree");
        let root = &tree.nodes()[tree.root()];
        assert_eq!(root.children().len(), 2);

        let children = [
            BlockPointer::new(0, 20).expect("pointer"),
            BlockPointer::new(1, 21).expect("pointer"),
        ];
        let block = render_node(root, 3, &children).expect("render");
        assert_eq!(block.read_str(0, 7), "0000020");

        let parsed = parse_node(&block).expect("parse");
        assert_eq!(parsed.children, children.to_vec());
        assert_eq!(parsed.entries, root.entries().to_vec());
        assert!(!parsed.is_leaf());
    }

    #[test]
    fn test_parse_blank_block_is_empty_leaf() {
        let parsed = parse_node(&Block::new()).expect("parse");
        assert!(parsed.is_leaf());
        assert!(parsed.entries.is_empty());
    }

    #[test]
    fn test_parse_full_width_node() {
        let tree = BTreeIndex::from_entries(12, (1..=10).map(|k| entry(k, 7))).expect("tree");
        let block = render_node(&tree.nodes()[tree.root()], 12, &[]).expect("render");
        let parsed = parse_node(&block).expect("parse");
        assert_eq!(parsed.entries.len(), 10);
    }

    #[test]
    fn test_render_rejects_mismatched_children() {
        let tree = BTreeIndex::from_entries(3, (1..=3).map(|k| entry(k, 10))).expect("tree");
        let root = &tree.nodes()[tree.root()];
        assert_eq!(
            render_node(root, 3, &[]),
            Err(NodeError::ChildCountMismatch {
                expected: 2,
                actual: 0
            })
        );
        assert_eq!(
            render_node(root, 13, &[]),
            Err(NodeError::UnsupportedOrder(13))
        );
    }

    #[test]
    fn test_parse_rejects_corrupt_pointer() {
        let mut block = Block::new();
        block.write_bytes(0, b"00x0001");
        assert!(matches!(parse_node(&block), Err(NodeError::Codec(_))));
    }
}
