//! Superblock structure and serialization.
//!
//! The superblock occupies block 4 of file 0 (right after the bitmap) and
//! holds database-wide metadata as space-padded ASCII fields.

use crate::storage::allocator::BITMAP_BLOCKS;
use crate::storage::block::{BLOCK_SIZE, Block};
use crate::storage::pointer::BlockId;

/// Block id of the superblock in file 0.
// BITMAP_BLOCKS is 4.
#[allow(clippy::cast_possible_truncation)]
pub const SUPERBLOCK_BLOCK: BlockId = BITMAP_BLOCKS as BlockId;

/// Maximum length of a database name.
pub const MAX_NAME_LEN: usize = 30;

/// Largest FCB count the single-digit field can hold.
pub const MAX_STORED_FCB_COUNT: usize = 9;

/// Largest file count the five-character field can hold.
pub const MAX_FILE_COUNT: usize = 99_999;

/// Superblock field offsets.
mod offsets {
    pub const NAME: usize = 0;
    pub const FCB_COUNT: usize = 30;
    pub const FILE_COUNT: usize = 31;
    pub const BLOCK_SIZE: usize = 36;
    // 39-255: unused
}

/// Superblock field widths.
mod widths {
    pub const NAME: usize = 30;
    pub const FILE_COUNT: usize = 5;
    pub const BLOCK_SIZE: usize = 3;
}

/// Database-wide metadata stored in file 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Database name (at most `MAX_NAME_LEN` ASCII characters).
    pub database_name: String,
    /// Number of FCBs in the directory. Stored as one digit, saturating at 9;
    /// the directory chain is authoritative.
    pub fcb_count: usize,
    /// Number of paged files belonging to the database.
    pub file_count: usize,
    /// Block size in bytes (always `BLOCK_SIZE`).
    pub block_size: usize,
}

impl Superblock {
    /// Create a superblock for a fresh single-file database.
    pub fn new(database_name: &str) -> Result<Self, SuperblockError> {
        validate_name(database_name)?;
        Ok(Self {
            database_name: database_name.to_string(),
            fcb_count: 0,
            file_count: 1,
            block_size: BLOCK_SIZE,
        })
    }

    /// Serialize the superblock to a block.
    pub fn to_block(&self) -> Result<Block, SuperblockError> {
        validate_name(&self.database_name)?;
        if self.file_count > MAX_FILE_COUNT {
            return Err(SuperblockError::InvalidField {
                field: "file count",
                value: self.file_count.to_string(),
            });
        }

        let mut block = Block::new();
        block.write_bytes(offsets::NAME, self.database_name.as_bytes());
        let fcb_digit = self.fcb_count.min(MAX_STORED_FCB_COUNT).to_string();
        block.write_bytes(offsets::FCB_COUNT, fcb_digit.as_bytes());
        block.write_bytes(
            offsets::FILE_COUNT,
            format!("{:<width$}", self.file_count, width = widths::FILE_COUNT).as_bytes(),
        );
        block.write_bytes(
            offsets::BLOCK_SIZE,
            format!("{:<width$}", self.block_size, width = widths::BLOCK_SIZE).as_bytes(),
        );
        Ok(block)
    }

    /// Deserialize a superblock from a block.
    pub fn from_block(block: &Block) -> Result<Self, SuperblockError> {
        let database_name = block
            .read_str(offsets::NAME, widths::NAME)
            .trim_end()
            .to_string();
        if database_name.is_empty() {
            return Err(SuperblockError::InvalidName(database_name));
        }

        let fcb_count = parse_field(block, "fcb count", offsets::FCB_COUNT, 1)?;
        let file_count = parse_field(block, "file count", offsets::FILE_COUNT, widths::FILE_COUNT)?;
        let block_size = parse_field(block, "block size", offsets::BLOCK_SIZE, widths::BLOCK_SIZE)?;

        if block_size != BLOCK_SIZE {
            return Err(SuperblockError::BlockSizeMismatch {
                expected: BLOCK_SIZE,
                found: block_size,
            });
        }
        if file_count == 0 {
            return Err(SuperblockError::InvalidField {
                field: "file count",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_name,
            fcb_count,
            file_count,
            block_size,
        })
    }
}

/// Check that a database name fits the superblock name field.
fn validate_name(name: &str) -> Result<(), SuperblockError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || !name.bytes().all(|b| b.is_ascii_graphic())
    {
        return Err(SuperblockError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Parse a space-padded decimal field.
fn parse_field(
    block: &Block,
    field: &'static str,
    offset: usize,
    width: usize,
) -> Result<usize, SuperblockError> {
    let raw = block.read_str(offset, width).trim();
    raw.parse().map_err(|_| SuperblockError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

/// Errors that can occur when reading or writing the superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuperblockError {
    /// Database name is empty, too long, or not printable ASCII.
    InvalidName(String),
    /// A numeric field could not be parsed or does not fit.
    InvalidField { field: &'static str, value: String },
    /// The file was written with a different block size.
    BlockSizeMismatch { expected: usize, found: usize },
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(
                f,
                "invalid database name '{name}' (1-{MAX_NAME_LEN} printable ASCII characters)"
            ),
            Self::InvalidField { field, value } => {
                write!(f, "invalid superblock {field}: '{value}'")
            }
            Self::BlockSizeMismatch { expected, found } => {
                write!(f, "block size mismatch: expected {expected}, found {found}")
            }
        }
    }
}

impl std::error::Error for SuperblockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_layout() {
        let superblock = Superblock::new("movies").expect("superblock");
        let block = superblock.to_block().expect("to block");

        assert_eq!(block.read_str(0, 30), format!("{:<30}", "movies"));
        assert_eq!(block.read_str(30, 1), "0");
        assert_eq!(block.read_str(31, 5), "1    ");
        assert_eq!(block.read_str(36, 3), "256");
        assert_eq!(block.read_str(39, 10), "          ");
    }

    #[test]
    fn test_superblock_roundtrip() {
        let mut superblock = Superblock::new("inventory_2024").expect("superblock");
        superblock.fcb_count = 3;
        superblock.file_count = 12;

        let block = superblock.to_block().expect("to block");
        let restored = Superblock::from_block(&block).expect("from block");
        assert_eq!(restored, superblock);
    }

    #[test]
    fn test_fcb_count_saturates() {
        let mut superblock = Superblock::new("db").expect("superblock");
        superblock.fcb_count = 14;
        let block = superblock.to_block().expect("to block");
        assert_eq!(block.read_str(30, 1), "9");
        assert_eq!(
            Superblock::from_block(&block).expect("from block").fcb_count,
            9
        );
    }

    #[test]
    fn test_invalid_names() {
        assert!(Superblock::new("").is_err());
        assert!(Superblock::new(&"x".repeat(31)).is_err());
        assert!(Superblock::new("has space").is_err());
        assert!(Superblock::new(&"x".repeat(30)).is_ok());
    }

    #[test]
    fn test_from_block_rejects_garbage() {
        assert!(matches!(
            Superblock::from_block(&Block::new()),
            Err(SuperblockError::InvalidName(_))
        ));

        let mut block = Superblock::new("db")
            .expect("superblock")
            .to_block()
            .expect("to block");
        block.write_bytes(36, b"512");
        assert_eq!(
            Superblock::from_block(&block),
            Err(SuperblockError::BlockSizeMismatch {
                expected: 256,
                found: 512
            })
        );

        block.write_bytes(31, b"ab   ");
        assert!(matches!(
            Superblock::from_block(&block),
            Err(SuperblockError::InvalidField { .. })
        ));
    }
}
