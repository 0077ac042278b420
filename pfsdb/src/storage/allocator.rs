//! Block allocator using a hexadecimal bitmap to track free/used blocks.
//!
//! The bitmap lives in the first `BITMAP_BLOCKS` blocks of every paged file.
//! Each byte of a bitmap block is one uppercase hex digit covering four
//! consecutive blocks, most significant bit first: block `4k` is the digit's
//! 8-bit, block `4k + 3` its 1-bit. Bit set = used, bit clear = free.
//!
//! Block `b` is tracked by digit `(b / 4) % 256` of bitmap block `b / 1024`.

use crate::storage::block::{BLOCK_SIZE, Block};
use crate::storage::pointer::BlockId;

/// Number of blocks tracked by a single hex digit.
const BLOCKS_PER_DIGIT: usize = 4;

/// Number of bitmap blocks at the start of every paged file.
pub const BITMAP_BLOCKS: usize = 4;

/// Number of blocks tracked by a single bitmap block.
pub const BLOCKS_PER_BITMAP_BLOCK: usize = BLOCK_SIZE * BLOCKS_PER_DIGIT;

/// Largest number of blocks a paged file can hold.
pub const MAX_TRACKED_BLOCKS: usize = BITMAP_BLOCKS * BLOCKS_PER_BITMAP_BLOCK;

/// Uppercase hex digits, indexed by value.
const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Errors raised by the allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// Block id outside `0..total_blocks`.
    OutOfRange { block: BlockId, total_blocks: usize },
    /// Attempt to free a reserved block.
    Reserved(BlockId),
    /// Requested capacity cannot be tracked.
    InvalidCapacity(usize),
    /// A bitmap block holds something other than a hex digit.
    Format { row: usize, column: usize, found: u8 },
    /// Wrong number of bitmap blocks supplied.
    MissingBitmapBlocks(usize),
}

impl std::fmt::Display for AllocatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange {
                block,
                total_blocks,
            } => write!(f, "block {block} out of range (total blocks: {total_blocks})"),
            Self::Reserved(block) => write!(f, "block {block} is reserved"),
            Self::InvalidCapacity(n) => write!(
                f,
                "cannot track {n} blocks (must be {BITMAP_BLOCKS}..={MAX_TRACKED_BLOCKS})"
            ),
            Self::Format { row, column, found } => write!(
                f,
                "bitmap block {row} column {column}: invalid hex digit 0x{found:02x}"
            ),
            Self::MissingBitmapBlocks(n) => {
                write!(f, "expected {BITMAP_BLOCKS} bitmap blocks, got {n}")
            }
        }
    }
}

impl std::error::Error for AllocatorError {}

/// A block allocation bitmap for one paged file.
#[derive(Debug, Clone)]
pub struct BlockAllocator {
    /// One nibble value (0..=15) per group of four blocks.
    digits: Vec<u8>,
    /// Total number of blocks in the file.
    total_blocks: usize,
    /// Number of free blocks.
    free_count: usize,
}

impl BlockAllocator {
    /// Create an allocator for a freshly formatted file.
    ///
    /// The bitmap blocks themselves are marked used.
    pub fn new(total_blocks: usize) -> Result<Self, AllocatorError> {
        if !(BITMAP_BLOCKS..=MAX_TRACKED_BLOCKS).contains(&total_blocks) {
            return Err(AllocatorError::InvalidCapacity(total_blocks));
        }

        let mut digits = vec![0u8; MAX_TRACKED_BLOCKS / BLOCKS_PER_DIGIT];
        for block in 0..BITMAP_BLOCKS {
            set_bit(&mut digits, block);
        }

        Ok(Self {
            digits,
            total_blocks,
            free_count: total_blocks - BITMAP_BLOCKS,
        })
    }

    /// Load an allocator from its bitmap blocks.
    pub fn from_blocks(blocks: &[Block], total_blocks: usize) -> Result<Self, AllocatorError> {
        if !(BITMAP_BLOCKS..=MAX_TRACKED_BLOCKS).contains(&total_blocks) {
            return Err(AllocatorError::InvalidCapacity(total_blocks));
        }
        if blocks.len() != BITMAP_BLOCKS {
            return Err(AllocatorError::MissingBitmapBlocks(blocks.len()));
        }

        let mut digits = Vec::with_capacity(MAX_TRACKED_BLOCKS / BLOCKS_PER_DIGIT);
        for (row, block) in blocks.iter().enumerate() {
            for (column, &byte) in block.as_bytes().iter().enumerate() {
                let value = hex_value(byte).ok_or(AllocatorError::Format {
                    row,
                    column,
                    found: byte,
                })?;
                digits.push(value);
            }
        }
        for block in 0..BITMAP_BLOCKS {
            set_bit(&mut digits, block);
        }

        let used = (0..total_blocks).filter(|&b| get_bit(&digits, b)).count();

        Ok(Self {
            digits,
            total_blocks,
            free_count: total_blocks - used,
        })
    }

    /// Serialize the bitmap into its `BITMAP_BLOCKS` blocks.
    #[must_use]
    pub fn to_blocks(&self) -> Vec<Block> {
        self.digits
            .chunks(BLOCK_SIZE)
            .map(|row| {
                let mut block = Block::new();
                for (column, &value) in row.iter().enumerate() {
                    block.as_bytes_mut()[column] = HEX_DIGITS[usize::from(value & 0x0F)];
                }
                block
            })
            .collect()
    }

    /// Mark a block as used. Marking an already used block is a no-op.
    pub fn mark_used(&mut self, block: BlockId) -> Result<(), AllocatorError> {
        let index = self.check_range(block)?;
        if !get_bit(&self.digits, index) {
            set_bit(&mut self.digits, index);
            self.free_count -= 1;
        }
        Ok(())
    }

    /// Mark a block as free. Freeing an already free block is a no-op.
    pub fn mark_free(&mut self, block: BlockId) -> Result<(), AllocatorError> {
        let index = self.check_range(block)?;
        if index < BITMAP_BLOCKS {
            return Err(AllocatorError::Reserved(block));
        }
        if get_bit(&self.digits, index) {
            clear_bit(&mut self.digits, index);
            self.free_count += 1;
        }
        Ok(())
    }

    /// Find the earliest free block without claiming it.
    ///
    /// Scans digits in row-major order and each digit most significant bit
    /// first, so the result is the lowest free block id.
    #[must_use]
    pub fn next_free(&self) -> Option<BlockId> {
        if self.free_count == 0 {
            return None;
        }
        for (digit_index, &value) in self.digits.iter().enumerate() {
            if value == 0x0F {
                continue;
            }
            for offset in 0..BLOCKS_PER_DIGIT {
                let index = digit_index * BLOCKS_PER_DIGIT + offset;
                if index >= self.total_blocks {
                    return None;
                }
                if !get_bit(&self.digits, index) {
                    return BlockId::try_from(index).ok();
                }
            }
        }
        None
    }

    /// Check if a block is in use. Out-of-range blocks report `false`.
    #[must_use]
    pub fn is_used(&self, block: BlockId) -> bool {
        let index = usize::from(block);
        index < self.total_blocks && get_bit(&self.digits, index)
    }

    /// Get the number of free blocks.
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free_count
    }

    /// Get the total number of blocks being tracked.
    #[must_use]
    pub const fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    fn check_range(&self, block: BlockId) -> Result<usize, AllocatorError> {
        let index = usize::from(block);
        if index >= self.total_blocks {
            return Err(AllocatorError::OutOfRange {
                block,
                total_blocks: self.total_blocks,
            });
        }
        Ok(index)
    }
}

/// Value of an uppercase or lowercase hex digit.
const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

/// Mask selecting a block's bit within its digit, most significant bit first.
const fn digit_mask(index: usize) -> u8 {
    0b1000 >> (index % BLOCKS_PER_DIGIT)
}

/// Get a bit from the bitmap.
fn get_bit(digits: &[u8], index: usize) -> bool {
    digits
        .get(index / BLOCKS_PER_DIGIT)
        .is_some_and(|&value| value & digit_mask(index) != 0)
}

/// Set a bit in the bitmap (mark as used).
fn set_bit(digits: &mut [u8], index: usize) {
    if let Some(value) = digits.get_mut(index / BLOCKS_PER_DIGIT) {
        *value |= digit_mask(index);
    }
}

/// Clear a bit in the bitmap (mark as free).
fn clear_bit(digits: &mut [u8], index: usize) {
    if let Some(value) = digits.get_mut(index / BLOCKS_PER_DIGIT) {
        *value &= !digit_mask(index);
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_new_allocator() {
        let alloc = BlockAllocator::new(4000).expect("allocator");

        for block in 0..4 {
            assert!(alloc.is_used(block));
        }
        assert!(!alloc.is_used(4));
        assert_eq!(alloc.free_count(), 3996);
        assert_eq!(alloc.next_free(), Some(4));
    }

    #[test]
    fn test_invalid_capacity() {
        assert_eq!(
            BlockAllocator::new(4097).err(),
            Some(AllocatorError::InvalidCapacity(4097))
        );
        assert!(BlockAllocator::new(3).is_err());
        assert!(BlockAllocator::new(MAX_TRACKED_BLOCKS).is_ok());
    }

    #[test]
    fn test_mark_used_is_idempotent() {
        let mut alloc = BlockAllocator::new(100).expect("allocator");
        alloc.mark_used(10).expect("mark");
        alloc.mark_used(10).expect("mark again");
        assert_eq!(alloc.free_count(), 95);

        alloc.mark_free(10).expect("free");
        alloc.mark_free(10).expect("free again");
        assert_eq!(alloc.free_count(), 96);
    }

    #[test]
    fn test_out_of_range_and_reserved() {
        let mut alloc = BlockAllocator::new(100).expect("allocator");
        assert_eq!(
            alloc.mark_used(100),
            Err(AllocatorError::OutOfRange {
                block: 100,
                total_blocks: 100
            })
        );
        assert!(alloc.mark_free(200).is_err());
        assert_eq!(alloc.mark_free(2), Err(AllocatorError::Reserved(2)));
        assert_eq!(alloc.free_count(), 96);
    }

    #[test]
    fn test_next_free_is_earliest_fit() {
        let mut alloc = BlockAllocator::new(100).expect("allocator");
        for block in 4..10 {
            alloc.mark_used(block).expect("mark");
        }
        assert_eq!(alloc.next_free(), Some(10));

        alloc.mark_free(6).expect("free");
        assert_eq!(alloc.next_free(), Some(6));
    }

    #[test]
    fn test_next_free_exhaustion() {
        let mut alloc = BlockAllocator::new(10).expect("allocator");
        while let Some(block) = alloc.next_free() {
            alloc.mark_used(block).expect("mark");
        }
        assert_eq!(alloc.free_count(), 0);
        assert_eq!(alloc.next_free(), None);
    }

    #[test]
    fn test_next_free_ignores_bits_past_capacity() {
        // 6 blocks: the second digit covers blocks 4..8, of which 6 and 7 do not exist.
        let mut alloc = BlockAllocator::new(6).expect("allocator");
        alloc.mark_used(4).expect("mark");
        alloc.mark_used(5).expect("mark");
        assert_eq!(alloc.next_free(), None);
    }

    #[test]
    fn test_bitmap_digit_layout() {
        let mut alloc = BlockAllocator::new(4000).expect("allocator");
        // Blocks 0-3 reserved: first digit F.
        // Block 4 used, block 7 used: second digit 1001 = 9.
        alloc.mark_used(4).expect("mark");
        alloc.mark_used(7).expect("mark");
        // Block 1024 is the first digit of the second bitmap block.
        alloc.mark_used(1024).expect("mark");

        let blocks = alloc.to_blocks();
        assert_eq!(blocks.len(), BITMAP_BLOCKS);
        assert_eq!(&blocks[0].as_bytes()[..3], b"F90");
        assert_eq!(blocks[1].as_bytes()[0], b'8');
        assert_eq!(blocks[3].as_bytes()[255], b'0');
    }

    #[test]
    fn test_roundtrip_to_blocks() {
        let mut alloc = BlockAllocator::new(4000).expect("allocator");
        for block in (4..4000).step_by(7) {
            alloc.mark_used(block).expect("mark");
        }

        let blocks = alloc.to_blocks();
        let restored = BlockAllocator::from_blocks(&blocks, 4000).expect("restore");

        assert_eq!(restored.free_count(), alloc.free_count());
        for block in 0..4000 {
            assert_eq!(
                restored.is_used(block),
                alloc.is_used(block),
                "mismatch at block {block}"
            );
        }
    }

    #[test]
    fn test_from_blocks_rejects_bad_digit() {
        let alloc = BlockAllocator::new(4000).expect("allocator");
        let mut blocks = alloc.to_blocks();
        blocks[2].as_bytes_mut()[17] = b'G';

        assert_eq!(
            BlockAllocator::from_blocks(&blocks, 4000).err(),
            Some(AllocatorError::Format {
                row: 2,
                column: 17,
                found: b'G'
            })
        );
        assert_eq!(
            BlockAllocator::from_blocks(&blocks[..3], 4000).err(),
            Some(AllocatorError::MissingBitmapBlocks(3))
        );
    }

    #[test]
    fn test_free_count_conservation() {
        let mut rng = StdRng::seed_from_u64(7280);
        let mut alloc = BlockAllocator::new(4000).expect("allocator");
        let mut used = std::collections::BTreeSet::new();

        for _ in 0..5000 {
            let block: BlockId = rng.random_range(4..4000);
            if rng.random_bool(0.6) {
                alloc.mark_used(block).expect("mark");
                used.insert(block);
            } else {
                alloc.mark_free(block).expect("free");
                used.remove(&block);
            }
            assert_eq!(alloc.free_count(), 4000 - BITMAP_BLOCKS - used.len());
        }
    }
}
