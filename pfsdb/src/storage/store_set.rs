//! The ordered set of paged files belonging to one database.
//!
//! File 0 carries the superblock, whose file count tells `open` how many
//! further files (`<db>.db1`, `<db>.db2`, ...) to load. New files are created
//! on demand when allocation runs out of space, and the file count is updated
//! and persisted each time.

use std::path::{Path, PathBuf};

use crate::storage::block::Block;
use crate::storage::file::{AppendOutcome, PagedStore, RECORDS_PER_BLOCK, StoreError};
use crate::storage::pointer::{BlockPointer, DataBlockPointer, FileId, KeyPointer};
use crate::storage::record::Record;
use crate::storage::superblock::Superblock;

/// A chain of data blocks possibly spanning several files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChain {
    /// First block of the chain, `None` for an empty chain.
    pub start: Option<BlockPointer>,
    /// One key pointer per record, in record order.
    pub key_pointers: Vec<KeyPointer>,
    /// Number of data blocks in the chain.
    pub blocks_written: usize,
}

/// All paged files of one database.
#[derive(Debug)]
pub struct StoreSet {
    directory: PathBuf,
    database_name: String,
    blocks_per_file: usize,
    stores: Vec<PagedStore>,
}

impl StoreSet {
    /// Create file 0 of a new database.
    pub fn create(
        directory: &Path,
        database_name: &str,
        blocks_per_file: usize,
    ) -> Result<Self, StoreError> {
        let store = PagedStore::create(directory, database_name, 0, blocks_per_file)?;
        Ok(Self {
            directory: directory.to_path_buf(),
            database_name: database_name.to_string(),
            blocks_per_file,
            stores: vec![store],
        })
    }

    /// Open every paged file of an existing database.
    pub fn open(directory: &Path, database_name: &str) -> Result<Self, StoreError> {
        let first = PagedStore::open(&PagedStore::path_for(directory, database_name, 0), 0)?;
        let blocks_per_file = first.total_blocks();
        let file_count = first.superblock().map_or(1, |s| s.file_count);

        let mut stores = Vec::with_capacity(file_count);
        stores.push(first);
        for seq in 1..file_count {
            let seq = FileId::try_from(seq).map_err(|_| StoreError::AllocationExhausted {
                requested: 1,
                allocated: 0,
            })?;
            let path = PagedStore::path_for(directory, database_name, seq);
            stores.push(PagedStore::open(&path, seq)?);
        }

        tracing::debug!(
            "Opened database '{}' with {} paged files",
            database_name,
            stores.len()
        );

        Ok(Self {
            directory: directory.to_path_buf(),
            database_name: database_name.to_string(),
            blocks_per_file,
            stores,
        })
    }

    /// Get the database name.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Get the number of paged files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.stores.len()
    }

    /// Get the number of blocks in each paged file.
    #[must_use]
    pub const fn blocks_per_file(&self) -> usize {
        self.blocks_per_file
    }

    /// Get the paged files in order.
    #[must_use]
    pub fn stores(&self) -> &[PagedStore] {
        &self.stores
    }

    /// Get the total number of free blocks across all files.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.stores.iter().map(PagedStore::free_count).sum()
    }

    /// Get the superblock stored in file 0.
    pub fn superblock(&self) -> Result<&Superblock, StoreError> {
        self.stores
            .first()
            .and_then(PagedStore::superblock)
            .ok_or_else(|| self.missing_superblock())
    }

    /// Get a mutable reference to the superblock stored in file 0.
    pub fn superblock_mut(&mut self) -> Result<&mut Superblock, StoreError> {
        let error = self.missing_superblock();
        self.stores
            .first_mut()
            .and_then(PagedStore::superblock_mut)
            .ok_or(error)
    }

    fn missing_superblock(&self) -> StoreError {
        StoreError::InvalidFile {
            path: PagedStore::path_for(&self.directory, &self.database_name, 0),
            message: "file 0 has no superblock".to_string(),
        }
    }

    /// Get the paged file a pointer refers to.
    pub fn store(&self, file: FileId) -> Result<&PagedStore, StoreError> {
        self.stores
            .get(usize::from(file))
            .ok_or_else(|| self.missing_file(file))
    }

    /// Get mutable access to the paged file a pointer refers to.
    pub fn store_mut(&mut self, file: FileId) -> Result<&mut PagedStore, StoreError> {
        let error = self.missing_file(file);
        self.stores.get_mut(usize::from(file)).ok_or(error)
    }

    fn missing_file(&self, file: FileId) -> StoreError {
        StoreError::InvalidFile {
            path: PagedStore::path_for(&self.directory, &self.database_name, file),
            message: format!("file {file} is not part of the database"),
        }
    }

    /// Create the next paged file and record it in the superblock.
    pub fn open_next(&mut self) -> Result<FileId, StoreError> {
        let seq = FileId::try_from(self.stores.len()).map_err(|_| {
            StoreError::AllocationExhausted {
                requested: 1,
                allocated: 0,
            }
        })?;
        let store = PagedStore::create(
            &self.directory,
            &self.database_name,
            seq,
            self.blocks_per_file,
        )?;
        tracing::info!("Opened new paged file {}", store.path().display());
        self.stores.push(store);

        let file_count = self.stores.len();
        self.superblock_mut()?.file_count = file_count;
        self.store_mut(0)?.persist()?;

        Ok(seq)
    }

    /// Index of the first file with a free block, opening a new file if all
    /// existing ones are full.
    fn file_with_space(&mut self) -> Result<FileId, StoreError> {
        match self.stores.iter().position(|s| s.free_count() > 0) {
            Some(index) => FileId::try_from(index).map_err(|_| StoreError::AllocationExhausted {
                requested: 1,
                allocated: 0,
            }),
            None => self.open_next(),
        }
    }

    /// Claim `count` blocks, earliest file first, opening new files as needed.
    ///
    /// Either every block is claimed or none is: on failure the blocks
    /// already claimed are freed again.
    pub fn allocate_blocks(&mut self, count: usize) -> Result<Vec<BlockPointer>, StoreError> {
        let mut pointers = Vec::with_capacity(count);
        while pointers.len() < count {
            if let Err(e) = self.extend_allocation(&mut pointers, count) {
                self.release_allocation(&pointers);
                return Err(e);
            }
        }
        Ok(pointers)
    }

    /// Claim up to `count - pointers.len()` blocks from one file.
    fn extend_allocation(
        &mut self,
        pointers: &mut Vec<BlockPointer>,
        count: usize,
    ) -> Result<(), StoreError> {
        let file = self.file_with_space()?;
        let store = self.store_mut(file)?;
        let run = store.allocate_run(count - pointers.len())?;
        for block in run.blocks {
            pointers.push(store.pointer(block)?);
        }
        Ok(())
    }

    fn release_allocation(&mut self, pointers: &[BlockPointer]) {
        for &pointer in pointers {
            if let Err(e) = self.release_block(pointer) {
                tracing::warn!("Failed to free block {} after allocation error: {}", pointer, e);
            }
        }
    }

    /// Write records as one chain of data blocks, spanning files as needed.
    ///
    /// When a file is exhausted mid-chain, the remaining records continue in
    /// the next file with free space and the previous run's last block is
    /// linked to the new run's first block.
    pub fn append_records(&mut self, records: &[Record]) -> Result<RecordChain, StoreError> {
        let mut chain = RecordChain {
            start: None,
            key_pointers: Vec::with_capacity(records.len()),
            blocks_written: 0,
        };
        let mut previous_end: Option<BlockPointer> = None;
        let mut remaining = records;

        while !remaining.is_empty() {
            let file = self.file_with_space()?;
            let AppendOutcome {
                start,
                end,
                key_pointers,
                records_written,
                blocks_written,
                exhausted,
            } = self
                .store_mut(file)?
                .append_records(remaining, RECORDS_PER_BLOCK)?;

            tracing::debug!(
                "Wrote {} records in {} blocks to file {}",
                records_written,
                blocks_written,
                file
            );

            if let (Some(previous), Some(_)) = (previous_end, start) {
                self.set_next_pointer(previous, start)?;
            }
            if chain.start.is_none() {
                chain.start = start;
            }
            if end.is_some() {
                previous_end = end;
            }
            chain.key_pointers.extend(key_pointers);
            chain.blocks_written += blocks_written;
            remaining = &remaining[records_written..];
            debug_assert!(exhausted || remaining.is_empty());
        }

        Ok(chain)
    }

    /// Read the block a pointer refers to.
    pub fn read_block(&self, pointer: BlockPointer) -> Result<&Block, StoreError> {
        self.store(pointer.file())?.read_block(pointer.block())
    }

    /// Write the block a pointer refers to.
    pub fn write_block(&mut self, pointer: BlockPointer, bytes: &[u8]) -> Result<(), StoreError> {
        self.store_mut(pointer.file())?
            .write_block(pointer.block(), bytes)
    }

    /// Read the record a data pointer refers to.
    pub fn read_record(&self, pointer: DataBlockPointer) -> Result<Record, StoreError> {
        let block = pointer.block();
        self.store(block.file())?
            .read_record(block.block(), pointer.slot())
    }

    /// Decode the trailing next-block pointer of a chained block.
    pub fn next_pointer(&self, pointer: BlockPointer) -> Result<Option<BlockPointer>, StoreError> {
        self.store(pointer.file())?.next_pointer(pointer.block())
    }

    /// Rewrite the trailing next-block pointer of a chained block.
    pub fn set_next_pointer(
        &mut self,
        pointer: BlockPointer,
        next: Option<BlockPointer>,
    ) -> Result<(), StoreError> {
        self.store_mut(pointer.file())?
            .set_next_pointer(pointer.block(), next)
    }

    /// Free a block and blank its content.
    pub fn release_block(&mut self, pointer: BlockPointer) -> Result<(), StoreError> {
        self.store_mut(pointer.file())?
            .release_block(pointer.block())
    }

    /// Check whether a block is marked used.
    #[must_use]
    pub fn is_used(&self, pointer: BlockPointer) -> bool {
        self.stores
            .get(usize::from(pointer.file()))
            .is_some_and(|s| s.is_used(pointer.block()))
    }

    /// Check whether a block is allocated and outside the reserved layout,
    /// so that `release_block` on it cannot fail.
    #[must_use]
    pub fn is_releasable(&self, pointer: BlockPointer) -> bool {
        self.stores
            .get(usize::from(pointer.file()))
            .is_some_and(|s| s.is_used(pointer.block()) && !s.is_reserved(pointer.block()))
    }

    /// Persist every paged file.
    pub fn persist_all(&mut self) -> Result<(), StoreError> {
        for store in &mut self.stores {
            store.persist()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn records(count: i32) -> Vec<Record> {
        (1..=count)
            .map(|k| Record::padded(&format!("{k},value {k}")).expect("record"))
            .collect()
    }

    #[test]
    fn test_allocate_blocks_spans_files() {
        let dir = tempdir().expect("create temp dir");
        let mut set = StoreSet::create(dir.path(), "spill", 10).expect("create");
        assert_eq!(set.free_count(), 4);

        let pointers = set.allocate_blocks(6).expect("allocate");
        assert_eq!(pointers.len(), 6);
        assert_eq!(set.file_count(), 2);
        assert_eq!(pointers[0].to_string(), "0000006");
        assert_eq!(pointers[4].to_string(), "0010004");
        assert_eq!(set.superblock().expect("superblock").file_count, 2);
        assert!(dir.path().join("spill.db1").exists());
    }

    #[test]
    fn test_allocate_blocks_rolls_back_on_error() {
        let dir = tempdir().expect("create temp dir");
        let mut set = StoreSet::create(dir.path(), "spill", 10).expect("create");
        // A stray next file makes opening file 1 fail.
        std::fs::write(dir.path().join("spill.db1"), "in the way").expect("write");

        assert!(set.allocate_blocks(6).is_err());
        assert_eq!(set.free_count(), 4);
        assert_eq!(set.file_count(), 1);
        let first_free = BlockPointer::new(0, 6).expect("pointer");
        assert!(!set.is_used(first_free));
        assert_eq!(set.allocate_blocks(4).expect("allocate")[0], first_free);
    }

    #[test]
    fn test_append_records_links_across_files() {
        let dir = tempdir().expect("create temp dir");
        let mut set = StoreSet::create(dir.path(), "spill", 8).expect("create");
        // File 0 has blocks 6 and 7 free: 12 records. The rest spills.
        let chain = set.append_records(&records(20)).expect("append");

        assert_eq!(chain.key_pointers.len(), 20);
        assert_eq!(chain.blocks_written, 4);
        assert_eq!(set.file_count(), 2);

        let mut visited = Vec::new();
        let mut current = chain.start;
        while let Some(pointer) = current {
            visited.push(pointer.to_string());
            current = set.next_pointer(pointer).expect("next");
        }
        assert_eq!(visited, vec!["0000006", "0000007", "0010004", "0010005"]);

        let last = chain.key_pointers[19];
        assert_eq!(set.read_record(last.pointer()).expect("record").key(), 20);
    }

    #[test]
    fn test_open_reloads_all_files() {
        let dir = tempdir().expect("create temp dir");
        {
            let mut set = StoreSet::create(dir.path(), "multi", 8).expect("create");
            set.append_records(&records(40)).expect("append");
            set.persist_all().expect("persist");
        }

        let set = StoreSet::open(dir.path(), "multi").expect("open");
        assert_eq!(set.file_count(), 3);
        assert_eq!(set.blocks_per_file(), 8);
        assert_eq!(set.database_name(), "multi");
        let pointer = BlockPointer::new(2, 4).expect("pointer");
        assert!(set.is_used(pointer));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().expect("create temp dir");
        let set = StoreSet::create(dir.path(), "single", 100).expect("create");
        let pointer = BlockPointer::new(3, 10).expect("pointer");
        assert!(matches!(
            set.read_block(pointer),
            Err(StoreError::InvalidFile { .. })
        ));
        assert!(!set.is_used(pointer));
    }
}
