//! Paged file I/O and record packing.
//!
//! A `PagedStore` owns one paged file (`<db>.db<seq>`) of `total_blocks`
//! fixed-size blocks. The whole block array is held in memory; `persist`
//! writes it back and syncs the file.
//!
//! # Block Layout
//!
//! - Blocks 0-3: allocation bitmap (every file)
//! - Block 4: superblock (file 0 only)
//! - Block 5: head of the FCB directory chain (file 0 only)
//! - Remaining blocks: data and index blocks
//!
//! # Data Blocks
//!
//! A data block holds up to `RECORDS_PER_BLOCK` records of `RECORD_SIZE`
//! bytes starting at offset 0, followed by spaces and a trailing 7-char
//! `BlockPointer` to the next block of the chain (or the sentinel).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::allocator::{AllocatorError, BITMAP_BLOCKS, BlockAllocator, MAX_TRACKED_BLOCKS};
use crate::storage::block::{BLOCK_SIZE, BLOCK_SIZE_U64, Block, NEXT_POINTER_OFFSET};
use crate::storage::pointer::{
    BlockId, BlockPointer, CodecError, DataBlockPointer, FileId, KeyPointer, MAX_FILE_ID,
    MAX_RECORD_SLOT,
};
use crate::storage::record::{RECORD_SIZE, Record};
use crate::storage::superblock::{SUPERBLOCK_BLOCK, Superblock, SuperblockError};

/// Default number of records packed into one data block.
pub const RECORDS_PER_BLOCK: usize = 6;

/// Block id of the first FCB directory block in file 0.
pub const DIRECTORY_HEAD_BLOCK: BlockId = SUPERBLOCK_BLOCK + 1;

/// Number of blocks reserved at the start of file 0.
pub const FILE_ZERO_RESERVED: usize = BITMAP_BLOCKS + 2;

/// Result of allocating a run of blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRun {
    /// Claimed block ids, in claim order.
    pub blocks: Vec<BlockId>,
    /// True if fewer blocks than requested were available; the caller
    /// continues in a new file.
    pub exhausted: bool,
}

/// Result of packing records into data blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// First block of the written chain, `None` if nothing was written.
    pub start: Option<BlockPointer>,
    /// Last block of the written chain. Its trailing pointer is the sentinel.
    pub end: Option<BlockPointer>,
    /// One key pointer per written record, in record order.
    pub key_pointers: Vec<KeyPointer>,
    /// Number of records written.
    pub records_written: usize,
    /// Number of data blocks written.
    pub blocks_written: usize,
    /// True if the file ran out of blocks before all records were written.
    pub exhausted: bool,
}

/// One paged file with its block array and allocation bitmap.
pub struct PagedStore {
    file: File,
    path: PathBuf,
    seq: FileId,
    blocks: Vec<Block>,
    allocator: BlockAllocator,
    superblock: Option<Superblock>,
}

impl PagedStore {
    /// Path of paged file `seq` of a database.
    #[must_use]
    pub fn path_for(directory: &Path, database_name: &str, seq: FileId) -> PathBuf {
        directory.join(format!("{database_name}.db{seq}"))
    }

    /// Create and format a new paged file.
    ///
    /// Returns an error if the file already exists. File 0 also receives
    /// the superblock for `database_name`.
    pub fn create(
        directory: &Path,
        database_name: &str,
        seq: FileId,
        total_blocks: usize,
    ) -> Result<Self, StoreError> {
        if seq > MAX_FILE_ID {
            return Err(StoreError::AllocationExhausted {
                requested: 1,
                allocated: 0,
            });
        }
        if !(FILE_ZERO_RESERVED + 1..=MAX_TRACKED_BLOCKS).contains(&total_blocks) {
            return Err(StoreError::Allocator(AllocatorError::InvalidCapacity(
                total_blocks,
            )));
        }

        let path = Self::path_for(directory, database_name, seq);
        if path.exists() {
            return Err(StoreError::AlreadyExists(path));
        }

        let superblock = if seq == 0 {
            Some(Superblock::new(database_name)?)
        } else {
            None
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(StoreError::Io)?;

        let mut store = Self {
            file,
            path,
            seq,
            blocks: Vec::new(),
            allocator: BlockAllocator::new(total_blocks)?,
            superblock,
        };
        store.format(total_blocks)?;
        store.persist()?;

        tracing::debug!(
            "Created paged file {} with {} free blocks",
            store.path.display(),
            store.free_count()
        );

        Ok(store)
    }

    /// Open an existing paged file and rebuild its allocator from the bitmap.
    pub fn open(path: &Path, seq: FileId) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(StoreError::Io)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(StoreError::Io)?;

        if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
            return Err(StoreError::InvalidFile {
                path: path.to_path_buf(),
                message: format!("size {} is not a whole number of blocks", buf.len()),
            });
        }

        let blocks = buf
            .chunks(BLOCK_SIZE)
            .map(Block::from_bytes)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|actual| StoreError::SizeMismatch {
                expected: BLOCK_SIZE,
                actual,
            })?;

        let total_blocks = blocks.len();
        if total_blocks <= FILE_ZERO_RESERVED || total_blocks > MAX_TRACKED_BLOCKS {
            return Err(StoreError::InvalidFile {
                path: path.to_path_buf(),
                message: format!("unsupported block count {total_blocks}"),
            });
        }

        let allocator = BlockAllocator::from_blocks(&blocks[..BITMAP_BLOCKS], total_blocks)?;
        let superblock = if seq == 0 {
            Some(Superblock::from_block(
                &blocks[usize::from(SUPERBLOCK_BLOCK)],
            )?)
        } else {
            None
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            seq,
            blocks,
            allocator,
            superblock,
        })
    }

    /// Initialize the block array and bitmap.
    ///
    /// File 0 additionally reserves the superblock and the directory head.
    fn format(&mut self, total_blocks: usize) -> Result<(), StoreError> {
        self.blocks = vec![Block::new(); total_blocks];
        self.allocator = BlockAllocator::new(total_blocks)?;
        if self.seq == 0 {
            self.allocator.mark_used(SUPERBLOCK_BLOCK)?;
            self.allocator.mark_used(DIRECTORY_HEAD_BLOCK)?;
            self.blocks[usize::from(DIRECTORY_HEAD_BLOCK)].set_next_pointer(None);
        }
        self.sync_metadata_blocks()
    }

    /// Get the sequence number of this file within its database.
    #[must_use]
    pub const fn seq(&self) -> FileId {
        self.seq
    }

    /// Get the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the total number of blocks in the file.
    #[must_use]
    pub fn total_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Get the number of free blocks.
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.allocator.free_count()
    }

    /// Get a reference to the allocator.
    #[must_use]
    pub const fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    /// Get the superblock. Only file 0 has one.
    #[must_use]
    pub const fn superblock(&self) -> Option<&Superblock> {
        self.superblock.as_ref()
    }

    /// Get a mutable reference to the superblock. Only file 0 has one.
    pub const fn superblock_mut(&mut self) -> Option<&mut Superblock> {
        self.superblock.as_mut()
    }

    /// Build a pointer to a block of this file.
    pub const fn pointer(&self, block: BlockId) -> Result<BlockPointer, CodecError> {
        BlockPointer::new(self.seq, block)
    }

    /// Read a block.
    pub fn read_block(&self, block: BlockId) -> Result<&Block, StoreError> {
        self.blocks
            .get(usize::from(block))
            .ok_or(StoreError::OutOfRange {
                block,
                total_blocks: self.blocks.len(),
            })
    }

    /// Write a block. `bytes` must be exactly `BLOCK_SIZE` long.
    pub fn write_block(&mut self, block: BlockId, bytes: &[u8]) -> Result<(), StoreError> {
        let total_blocks = self.blocks.len();
        let slot = self
            .blocks
            .get_mut(usize::from(block))
            .ok_or(StoreError::OutOfRange {
                block,
                total_blocks,
            })?;
        *slot = Block::from_bytes(bytes).map_err(|actual| StoreError::SizeMismatch {
            expected: BLOCK_SIZE,
            actual,
        })?;
        Ok(())
    }

    /// Claim up to `count` free blocks, earliest first.
    ///
    /// Never silently short: if fewer blocks are available, the partial run
    /// is returned with `exhausted` set.
    pub fn allocate_run(&mut self, count: usize) -> Result<AllocationRun, StoreError> {
        let mut blocks = Vec::with_capacity(count.min(self.free_count()));
        while blocks.len() < count {
            let Some(block) = self.allocator.next_free() else {
                break;
            };
            self.allocator.mark_used(block)?;
            blocks.push(block);
        }
        let exhausted = blocks.len() < count;
        Ok(AllocationRun { blocks, exhausted })
    }

    /// Pack records into newly allocated, chained data blocks.
    ///
    /// Each block receives up to `records_per_block` records and a trailing
    /// pointer to the next block; the last block written ends with the
    /// sentinel. If the file runs out of blocks, the records that fit are
    /// written and `exhausted` is set; the caller continues in another file
    /// and links the chains with `set_next_pointer`.
    pub fn append_records(
        &mut self,
        records: &[Record],
        records_per_block: usize,
    ) -> Result<AppendOutcome, StoreError> {
        if records_per_block == 0
            || records_per_block * RECORD_SIZE > NEXT_POINTER_OFFSET
            || records_per_block > usize::from(MAX_RECORD_SLOT) + 1
        {
            return Err(StoreError::InvalidRecordsPerBlock(records_per_block));
        }

        let needed = records.len().div_ceil(records_per_block);
        let run = self.allocate_run(needed)?;
        let capacity = run.blocks.len() * records_per_block;
        let writable = &records[..records.len().min(capacity)];

        let mut key_pointers = Vec::with_capacity(writable.len());
        let mut pointers = Vec::with_capacity(run.blocks.len());
        for &block in &run.blocks {
            pointers.push(self.pointer(block)?);
        }

        for (index, chunk) in writable.chunks(records_per_block).enumerate() {
            let block_pointer = pointers[index];
            let mut block = Block::new();
            for (slot, record) in chunk.iter().enumerate() {
                block.write_bytes(slot * RECORD_SIZE, record.as_bytes());
                // records_per_block is checked against MAX_RECORD_SLOT above.
                #[allow(clippy::cast_possible_truncation)]
                let data_pointer = DataBlockPointer::new(block_pointer, slot as u8)?;
                key_pointers.push(KeyPointer::new(record.key(), data_pointer)?);
            }
            block.set_next_pointer(pointers.get(index + 1).copied());
            self.blocks[usize::from(block_pointer.block())] = block;
        }

        Ok(AppendOutcome {
            start: pointers.first().copied(),
            end: pointers.last().copied(),
            key_pointers,
            records_written: writable.len(),
            blocks_written: pointers.len(),
            exhausted: run.exhausted,
        })
    }

    /// Read the record in `slot` of a data block.
    pub fn read_record(&self, block: BlockId, slot: u8) -> Result<Record, StoreError> {
        let offset = usize::from(slot) * RECORD_SIZE;
        if offset + RECORD_SIZE > NEXT_POINTER_OFFSET {
            return Err(StoreError::OutOfRange {
                block,
                total_blocks: self.blocks.len(),
            });
        }
        let data = self.read_block(block)?;
        Ok(Record::new(data.read_bytes(offset, RECORD_SIZE))?)
    }

    /// Decode the trailing next-block pointer of a chained block.
    pub fn next_pointer(&self, block: BlockId) -> Result<Option<BlockPointer>, StoreError> {
        Ok(self.read_block(block)?.next_pointer()?)
    }

    /// Rewrite the trailing next-block pointer of a chained block.
    pub fn set_next_pointer(
        &mut self,
        block: BlockId,
        next: Option<BlockPointer>,
    ) -> Result<(), StoreError> {
        let total_blocks = self.blocks.len();
        self.blocks
            .get_mut(usize::from(block))
            .ok_or(StoreError::OutOfRange {
                block,
                total_blocks,
            })?
            .set_next_pointer(next);
        Ok(())
    }

    /// Whether a block belongs to the file's fixed layout (bitmap, and in
    /// file 0 the superblock and directory head).
    #[must_use]
    pub fn is_reserved(&self, block: BlockId) -> bool {
        usize::from(block) < BITMAP_BLOCKS || (self.seq == 0 && block <= DIRECTORY_HEAD_BLOCK)
    }

    /// Return a block to the free pool and blank its content.
    pub fn release_block(&mut self, block: BlockId) -> Result<(), StoreError> {
        if self.is_reserved(block) {
            return Err(StoreError::Allocator(AllocatorError::Reserved(block)));
        }
        self.allocator.mark_free(block)?;
        self.blocks[usize::from(block)].clear();
        Ok(())
    }

    /// Check whether a block is marked used.
    #[must_use]
    pub fn is_used(&self, block: BlockId) -> bool {
        self.allocator.is_used(block)
    }

    /// Render the bitmap and superblock into their blocks.
    fn sync_metadata_blocks(&mut self) -> Result<(), StoreError> {
        for (index, block) in self.allocator.to_blocks().into_iter().enumerate() {
            self.blocks[index] = block;
        }
        if let Some(superblock) = &self.superblock {
            self.blocks[usize::from(SUPERBLOCK_BLOCK)] = superblock.to_block()?;
        }
        Ok(())
    }

    /// Flush the bitmap, superblock, and every block to disk and sync.
    pub fn persist(&mut self) -> Result<(), StoreError> {
        self.sync_metadata_blocks()?;

        let mut buf = Vec::with_capacity(self.blocks.len() * BLOCK_SIZE);
        for block in &self.blocks {
            buf.extend_from_slice(block.as_bytes());
        }

        self.file.seek(SeekFrom::Start(0)).map_err(StoreError::Io)?;
        self.file.write_all(&buf).map_err(StoreError::Io)?;
        self.file
            .set_len(self.blocks.len() as u64 * BLOCK_SIZE_U64)
            .map_err(StoreError::Io)?;
        self.file.sync_all().map_err(StoreError::Io)
    }
}

impl std::fmt::Debug for PagedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedStore")
            .field("path", &self.path)
            .field("seq", &self.seq)
            .field("total_blocks", &self.blocks.len())
            .field("free_count", &self.allocator.free_count())
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during paged file operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(PathBuf),
    /// Block id out of bounds.
    OutOfRange { block: BlockId, total_blocks: usize },
    /// Block buffer of the wrong size.
    SizeMismatch { expected: usize, actual: usize },
    /// Pointer or record encoding error.
    Codec(CodecError),
    /// Allocator error.
    Allocator(AllocatorError),
    /// Superblock error.
    Superblock(SuperblockError),
    /// No more blocks can be allocated, not even in a new file.
    AllocationExhausted { requested: usize, allocated: usize },
    /// Record packing factor does not fit a block.
    InvalidRecordsPerBlock(usize),
    /// The file is not a paged file.
    InvalidFile { path: PathBuf, message: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::OutOfRange {
                block,
                total_blocks,
            } => write!(f, "block {block} out of range (total blocks: {total_blocks})"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "block must be {expected} bytes, got {actual}")
            }
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Allocator(e) => write!(f, "allocator error: {e}"),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::AllocationExhausted {
                requested,
                allocated,
            } => write!(
                f,
                "allocation exhausted: requested {requested} blocks, allocated {allocated}"
            ),
            Self::InvalidRecordsPerBlock(n) => {
                write!(f, "{n} records per block do not fit a {BLOCK_SIZE}-byte block")
            }
            Self::InvalidFile { path, message } => {
                write!(f, "invalid paged file {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Allocator(e) => Some(e),
            Self::Superblock(e) => Some(e),
            Self::AlreadyExists(_)
            | Self::OutOfRange { .. }
            | Self::SizeMismatch { .. }
            | Self::AllocationExhausted { .. }
            | Self::InvalidRecordsPerBlock(_)
            | Self::InvalidFile { .. } => None,
        }
    }
}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<AllocatorError> for StoreError {
    fn from(e: AllocatorError) -> Self {
        Self::Allocator(e)
    }
}

impl From<SuperblockError> for StoreError {
    fn from(e: SuperblockError) -> Self {
        Self::Superblock(e)
    }
}
