//! Block type and constants for the paged store.
//!
//! The store uses 256-byte blocks as the fundamental unit of allocation and
//! I/O. Every byte on disk is printable ASCII; unused bytes are spaces.

use crate::storage::pointer::{BLOCK_POINTER_WIDTH, BlockPointer, CodecError};

/// Block size in bytes.
pub const BLOCK_SIZE: usize = 256;

/// Block size as u64 for offset calculations.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// Byte used for unused space.
pub const FILL_BYTE: u8 = b' ';

/// Offset of the trailing next-block pointer in a chained block.
pub const NEXT_POINTER_OFFSET: usize = BLOCK_SIZE - BLOCK_POINTER_WIDTH;

/// A single block buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    data: Box<[u8; BLOCK_SIZE]>,
}

impl Block {
    /// Create a blank block (all spaces).
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::new([FILL_BYTE; BLOCK_SIZE]),
        }
    }

    /// Create a block from raw bytes.
    ///
    /// Fails unless `bytes` is exactly `BLOCK_SIZE` long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, usize> {
        let data: [u8; BLOCK_SIZE] = bytes.try_into().map_err(|_| bytes.len())?;
        Ok(Self {
            data: Box::new(data),
        })
    }

    /// Get the raw bytes of the block.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    /// Get mutable access to the raw bytes of the block.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data
    }

    /// Read bytes from the block at the given offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes to the block at the given offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read an ASCII field. Non-UTF-8 content reads as an empty string.
    #[must_use]
    pub fn read_str(&self, offset: usize, len: usize) -> &str {
        std::str::from_utf8(self.read_bytes(offset, len)).unwrap_or("")
    }

    /// Blank the whole block.
    pub fn clear(&mut self) {
        self.data.fill(FILL_BYTE);
    }

    /// Decode the trailing next-block pointer. `None` marks the end of a chain.
    pub fn next_pointer(&self) -> Result<Option<BlockPointer>, CodecError> {
        BlockPointer::decode_optional(self.read_str(NEXT_POINTER_OFFSET, BLOCK_POINTER_WIDTH))
    }

    /// Write the trailing next-block pointer.
    pub fn set_next_pointer(&mut self, next: Option<BlockPointer>) {
        let encoded = BlockPointer::encode_optional(next);
        self.write_bytes(NEXT_POINTER_OFFSET, encoded.as_bytes());
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("text", &String::from_utf8_lossy(&self.data[..32]))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_block_is_blank() {
        let block = Block::new();
        assert!(block.as_bytes().iter().all(|&b| b == FILL_BYTE));
    }

    #[test]
    fn test_from_bytes_checks_size() {
        assert!(Block::from_bytes(&[b'x'; BLOCK_SIZE]).is_ok());
        assert_eq!(Block::from_bytes(&[b'x'; 10]), Err(10));
        assert_eq!(Block::from_bytes(&[b'x'; BLOCK_SIZE + 1]), Err(BLOCK_SIZE + 1));
    }

    #[test]
    fn test_read_write_bytes() {
        let mut block = Block::new();
        block.write_bytes(10, b"hello");
        assert_eq!(block.read_bytes(10, 5), b"hello");
        assert_eq!(block.read_str(9, 7), " hello ");
    }

    #[test]
    fn test_next_pointer() {
        let mut block = Block::new();
        block.set_next_pointer(None);
        assert_eq!(block.read_str(NEXT_POINTER_OFFSET, 7), "9999999");
        assert_eq!(block.next_pointer(), Ok(None));

        let next = BlockPointer::new(1, 42).expect("pointer");
        block.set_next_pointer(Some(next));
        assert_eq!(block.next_pointer(), Ok(Some(next)));
    }

    #[test]
    fn test_clear() {
        let mut block = Block::new();
        block.write_bytes(0, b"data");
        block.clear();
        assert_eq!(block, Block::new());
    }
}
