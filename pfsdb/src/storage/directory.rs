//! The FCB directory: one metadata record per stored file.
//!
//! # File Format
//!
//! Directory blocks form a chain starting at block 5 of file 0. Each block
//! holds up to `FCBS_PER_BLOCK` records of `FCB_SIZE` bytes:
//!
//! ```text
//! [name: 20][created: 14][block count: 10][data root: 7][index root: 7]
//! ```
//!
//! Records are packed from offset 0 with no gaps; a blank name field marks
//! the end of the live records in a block. The last 10 bytes of the block
//! hold the right-aligned pointer to the next directory block, or the
//! sentinel.

use std::collections::HashSet;

use crate::storage::block::{BLOCK_SIZE, Block, FILL_BYTE};
use crate::storage::btree::{IndexError, index_blocks};
use crate::storage::file::{DIRECTORY_HEAD_BLOCK, StoreError};
use crate::storage::pointer::{BLOCK_POINTER_WIDTH, BlockPointer, CodecError};
use crate::storage::store_set::StoreSet;
use crate::storage::time::TIMESTAMP_WIDTH;

/// Maximum file name length.
pub const MAX_FILE_NAME_LEN: usize = 20;

/// Width of the zero-padded block count.
pub const BLOCK_COUNT_WIDTH: usize = 10;

/// Size of one FCB record.
pub const FCB_SIZE: usize =
    MAX_FILE_NAME_LEN + TIMESTAMP_WIDTH + BLOCK_COUNT_WIDTH + 2 * BLOCK_POINTER_WIDTH;

/// FCB records per directory block.
pub const FCBS_PER_BLOCK: usize = 4;

/// Width of the right-aligned trailer holding the next directory block.
pub const TRAILER_WIDTH: usize = 10;

const MAX_BLOCK_COUNT: usize = 9_999_999_999;

/// Field offsets within an FCB record.
mod offsets {
    pub const NAME: usize = 0;
    pub const CREATED: usize = 20;
    pub const BLOCK_COUNT: usize = 34;
    pub const DATA_ROOT: usize = 44;
    pub const INDEX_ROOT: usize = 51;
}

/// Metadata describing one stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fcb {
    /// File name (1 to `MAX_FILE_NAME_LEN` printable ASCII characters).
    pub name: String,
    /// Creation time, `TIMESTAMP_WIDTH` characters.
    pub created: String,
    /// Data blocks plus index blocks owned by the file.
    pub block_count: usize,
    /// First block of the data chain.
    pub data_root: Option<BlockPointer>,
    /// Root node of the persisted index.
    pub index_root: Option<BlockPointer>,
}

impl Fcb {
    /// Encode the record as exactly `FCB_SIZE` bytes.
    pub fn encode(&self) -> Result<String, DirectoryError> {
        validate_name(&self.name)?;
        if self.created.len() != TIMESTAMP_WIDTH || !self.created.is_ascii() {
            return Err(DirectoryError::InvalidField {
                field: "created",
                value: self.created.clone(),
            });
        }
        if self.block_count > MAX_BLOCK_COUNT {
            return Err(DirectoryError::InvalidField {
                field: "block count",
                value: self.block_count.to_string(),
            });
        }

        let encoded = format!(
            "{:<name_width$}{}{:0count_width$}{}{}",
            self.name,
            self.created,
            self.block_count,
            BlockPointer::encode_optional(self.data_root),
            BlockPointer::encode_optional(self.index_root),
            name_width = MAX_FILE_NAME_LEN,
            count_width = BLOCK_COUNT_WIDTH,
        );
        debug_assert_eq!(encoded.len(), FCB_SIZE);
        Ok(encoded)
    }

    /// Decode a record from `FCB_SIZE` bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DirectoryError> {
        let text = std::str::from_utf8(bytes)
            .ok()
            .filter(|t| t.len() == FCB_SIZE && t.is_ascii())
            .ok_or_else(|| DirectoryError::InvalidField {
                field: "record",
                value: String::from_utf8_lossy(bytes).into_owned(),
            })?;

        let name = text[offsets::NAME..offsets::CREATED].trim_end().to_string();
        validate_name(&name)?;
        let created = text[offsets::CREATED..offsets::BLOCK_COUNT].to_string();
        let raw_count = &text[offsets::BLOCK_COUNT..offsets::DATA_ROOT];
        let block_count = raw_count
            .parse()
            .map_err(|_| DirectoryError::InvalidField {
                field: "block count",
                value: raw_count.to_string(),
            })?;
        let data_root =
            BlockPointer::decode_optional(&text[offsets::DATA_ROOT..offsets::INDEX_ROOT])?;
        let index_root = BlockPointer::decode_optional(&text[offsets::INDEX_ROOT..FCB_SIZE])?;

        Ok(Self {
            name,
            created,
            block_count,
            data_root,
            index_root,
        })
    }
}

/// Check that a file name fits the FCB name field.
pub fn validate_name(name: &str) -> Result<(), DirectoryError> {
    if name.is_empty()
        || name.len() > MAX_FILE_NAME_LEN
        || !name.bytes().all(|b| b.is_ascii_graphic())
    {
        return Err(DirectoryError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Position of an FCB within the directory chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    block: BlockPointer,
    index: usize,
}

/// Chained FCB directory rooted at block 5 of file 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directory {
    head: BlockPointer,
}

impl Directory {
    /// The directory of a database, rooted at its fixed head block.
    pub fn new() -> Result<Self, DirectoryError> {
        Ok(Self {
            head: BlockPointer::new(0, DIRECTORY_HEAD_BLOCK)?,
        })
    }

    #[must_use]
    pub const fn head(&self) -> BlockPointer {
        self.head
    }

    /// Directory blocks in chain order.
    pub fn chain(&self, stores: &StoreSet) -> Result<Vec<BlockPointer>, DirectoryError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(self.head);
        while let Some(pointer) = current {
            if !seen.insert(pointer) {
                return Err(DirectoryError::Cycle(pointer));
            }
            chain.push(pointer);
            current = stores.next_pointer(pointer)?;
        }
        Ok(chain)
    }

    /// Add an FCB to the first directory block with room, growing the chain
    /// by one block if every block is full.
    pub fn append(&self, stores: &mut StoreSet, fcb: &Fcb) -> Result<(), DirectoryError> {
        let encoded = fcb.encode()?;
        let chain = self.chain(stores)?;

        for &pointer in &chain {
            let mut block = stores.read_block(pointer)?.clone();
            let live = live_entries(&block);
            if live < FCBS_PER_BLOCK {
                block.write_bytes(live * FCB_SIZE, encoded.as_bytes());
                stores.write_block(pointer, block.as_bytes())?;
                stores.store_mut(pointer.file())?.persist()?;
                tracing::debug!("Added FCB '{}' to directory block {}", fcb.name, pointer);
                return Ok(());
            }
        }

        let tail = chain.last().copied().unwrap_or(self.head);
        let pointer = stores.allocate_blocks(1)?.first().copied().ok_or(
            StoreError::AllocationExhausted {
                requested: 1,
                allocated: 0,
            },
        )?;
        let mut block = Block::new();
        block.write_bytes(0, encoded.as_bytes());
        block.set_next_pointer(None);
        stores.write_block(pointer, block.as_bytes())?;
        stores.set_next_pointer(tail, Some(pointer))?;
        stores.persist_all()?;

        tracing::info!(
            "Directory grew to block {} for FCB '{}'",
            pointer,
            fcb.name
        );
        Ok(())
    }

    /// Every live FCB in chain order.
    pub fn list(&self, stores: &StoreSet) -> Result<Vec<Fcb>, DirectoryError> {
        let mut fcbs = Vec::new();
        for pointer in self.chain(stores)? {
            let block = stores.read_block(pointer)?;
            for index in 0..live_entries(block) {
                fcbs.push(read_entry(block, index)?);
            }
        }
        Ok(fcbs)
    }

    /// Find an FCB by name.
    pub fn find_by_name(
        &self,
        stores: &StoreSet,
        name: &str,
    ) -> Result<Option<Fcb>, DirectoryError> {
        Ok(self.locate(stores, name)?.map(|(_, fcb)| fcb))
    }

    fn locate(
        &self,
        stores: &StoreSet,
        name: &str,
    ) -> Result<Option<(Slot, Fcb)>, DirectoryError> {
        for pointer in self.chain(stores)? {
            let block = stores.read_block(pointer)?;
            for index in 0..live_entries(block) {
                let fcb = read_entry(block, index)?;
                if fcb.name == name {
                    return Ok(Some((
                        Slot {
                            block: pointer,
                            index,
                        },
                        fcb,
                    )));
                }
            }
        }
        Ok(None)
    }

    /// Remove a file's FCB and free every block the file owns.
    ///
    /// Later entries in the same directory block shift left to close the
    /// gap. The data chain is freed from its root to the sentinel, then the
    /// index is freed breadth-first from its root. Returns the freed blocks,
    /// data blocks first.
    ///
    /// Both chains are walked before anything changes, so a corrupt pointer
    /// leaves the directory and the allocators untouched.
    pub fn remove(
        &self,
        stores: &mut StoreSet,
        name: &str,
    ) -> Result<Vec<BlockPointer>, DirectoryError> {
        let (slot, fcb) = self
            .locate(stores, name)?
            .ok_or_else(|| DirectoryError::NotFound(name.to_string()))?;

        let mut reclaimed = data_blocks(stores, name, fcb.data_root)?;
        let data_count = reclaimed.len();
        if let Some(root) = fcb.index_root {
            reclaimed.extend(index_blocks(stores, root)?);
        }
        let mut unique = HashSet::new();
        if let Some(&pointer) = reclaimed
            .iter()
            .find(|&&p| !unique.insert(p) || !stores.is_releasable(p))
        {
            return Err(DirectoryError::NotReleasable(pointer));
        }

        let mut block = stores.read_block(slot.block)?.clone();
        let live = live_entries(&block);
        let tail_start = (slot.index + 1) * FCB_SIZE;
        let tail_end = live * FCB_SIZE;
        let tail = block.read_bytes(tail_start, tail_end - tail_start).to_vec();
        block.write_bytes(slot.index * FCB_SIZE, &tail);
        block.write_bytes((live - 1) * FCB_SIZE, &[FILL_BYTE; FCB_SIZE]);
        stores.write_block(slot.block, block.as_bytes())?;

        for &pointer in &reclaimed {
            stores.release_block(pointer)?;
        }
        stores.persist_all()?;

        tracing::info!(
            "Removed '{}': reclaimed {} data blocks and {} index blocks",
            name,
            data_count,
            reclaimed.len() - data_count
        );
        Ok(reclaimed)
    }
}

/// Blocks of a data chain, from its root to the sentinel.
fn data_blocks(
    stores: &StoreSet,
    name: &str,
    root: Option<BlockPointer>,
) -> Result<Vec<BlockPointer>, DirectoryError> {
    let mut blocks = Vec::new();
    let mut seen = HashSet::new();
    let mut current = root;
    while let Some(pointer) = current {
        if !seen.insert(pointer) {
            tracing::warn!("Data chain of '{}' loops back to {}", name, pointer);
            break;
        }
        current = stores.next_pointer(pointer)?;
        blocks.push(pointer);
    }
    Ok(blocks)
}

/// Number of live records in a directory block.
fn live_entries(block: &Block) -> usize {
    (0..FCBS_PER_BLOCK)
        .take_while(|&index| {
            block
                .read_bytes(index * FCB_SIZE + offsets::NAME, MAX_FILE_NAME_LEN)
                .iter()
                .any(|&b| b != FILL_BYTE)
        })
        .count()
}

fn read_entry(block: &Block, index: usize) -> Result<Fcb, DirectoryError> {
    Fcb::decode(block.read_bytes(index * FCB_SIZE, FCB_SIZE))
}

const _: () = assert!(FCBS_PER_BLOCK * FCB_SIZE <= BLOCK_SIZE - TRAILER_WIDTH);

/// Errors that can occur reading or changing the directory.
#[derive(Debug)]
pub enum DirectoryError {
    /// Paged store error.
    Store(StoreError),
    /// Pointer encoding error.
    Codec(CodecError),
    /// Error walking a persisted index.
    Index(IndexError),
    /// File name empty, too long or not printable ASCII.
    InvalidName(String),
    /// A record field could not be encoded or decoded.
    InvalidField { field: &'static str, value: String },
    /// No FCB with that name.
    NotFound(String),
    /// The directory chain revisits a block.
    Cycle(BlockPointer),
    /// A file claims a block that is free, reserved or claimed twice.
    NotReleasable(BlockPointer),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Index(e) => write!(f, "index error: {e}"),
            Self::InvalidName(name) => write!(
                f,
                "invalid file name '{name}' (1 to {MAX_FILE_NAME_LEN} printable ASCII characters)"
            ),
            Self::InvalidField { field, value } => write!(f, "invalid FCB {field}: '{value}'"),
            Self::NotFound(name) => write!(f, "file not found: {name}"),
            Self::Cycle(pointer) => write!(f, "directory chain revisits block {pointer}"),
            Self::NotReleasable(pointer) => {
                write!(f, "block {pointer} is not an allocated block of the file")
            }
        }
    }
}

impl std::error::Error for DirectoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Index(e) => Some(e),
            Self::InvalidName(_)
            | Self::InvalidField { .. }
            | Self::NotFound(_)
            | Self::Cycle(_)
            | Self::NotReleasable(_) => None,
        }
    }
}

impl From<StoreError> for DirectoryError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<CodecError> for DirectoryError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<IndexError> for DirectoryError {
    fn from(e: IndexError) -> Self {
        Self::Index(e)
    }
}
