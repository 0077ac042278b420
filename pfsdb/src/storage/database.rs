//! High-level database interface.
//!
//! A `Database` ties the paged files, the FCB directory and the per-file
//! B-tree indexes together behind the operations callers use: bulk-loading a
//! file, point lookups by key, reading a file back, removing a file and
//! listing the directory.

use std::collections::HashSet;
use std::path::Path;

use crate::storage::block::FILL_BYTE;
use crate::storage::btree::{BTreeError, BTreeIndex, IndexError, MAX_ORDER, MIN_ORDER, Lookup};
use crate::storage::btree::{persist_tree, search};
use crate::storage::directory::{Directory, DirectoryError, Fcb, validate_name};
use crate::storage::file::{PagedStore, RECORDS_PER_BLOCK, StoreError};
use crate::storage::pointer::{BlockPointer, CodecError};
use crate::storage::record::{RECORD_SIZE, Record};
use crate::storage::store_set::StoreSet;
use crate::storage::superblock::MAX_STORED_FCB_COUNT;
use crate::storage::time::{SystemTimeSource, TimeSource, format_timestamp};

/// Sizing parameters of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Blocks in each paged file.
    pub blocks_per_file: usize,
    /// Order of the per-file B-tree indexes.
    pub btree_order: usize,
}

impl DatabaseOptions {
    pub const DEFAULT_BLOCKS_PER_FILE: usize = 4000;
    pub const DEFAULT_BTREE_ORDER: usize = 11;
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            blocks_per_file: Self::DEFAULT_BLOCKS_PER_FILE,
            btree_order: Self::DEFAULT_BTREE_ORDER,
        }
    }
}

/// Where a bulk-loaded file ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltFile {
    /// First data block, `None` for an empty file.
    pub data_root: Option<BlockPointer>,
    /// Root node of the index, `None` for an empty file.
    pub index_root: Option<BlockPointer>,
    pub data_blocks: usize,
    pub index_blocks: usize,
}

impl BuiltFile {
    /// Total blocks owned by the file.
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.data_blocks + self.index_blocks
    }
}

/// A record found by key, with the number of blocks read to find it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundRecord {
    pub record: Record,
    /// Index nodes visited plus the data block.
    pub blocks_read: usize,
}

/// A database instance.
///
/// This is the main entry point for working with the storage engine. It owns
/// every paged file of the database.
#[derive(Debug)]
pub struct Database<T: TimeSource = SystemTimeSource> {
    stores: StoreSet,
    directory: Directory,
    btree_order: usize,
    time_source: T,
}

impl Database {
    /// Create a new database in `directory`.
    ///
    /// File 0 must not already exist.
    pub fn create(
        directory: &Path,
        name: &str,
        options: DatabaseOptions,
    ) -> Result<Self, DatabaseError> {
        Self::create_with_time_source(directory, name, options, SystemTimeSource)
    }

    /// Open an existing database in `directory`.
    pub fn open(
        directory: &Path,
        name: &str,
        options: DatabaseOptions,
    ) -> Result<Self, DatabaseError> {
        Self::open_with_time_source(directory, name, options, SystemTimeSource)
    }

    /// Open an existing database or create a new one if it doesn't exist.
    pub fn open_or_create(
        directory: &Path,
        name: &str,
        options: DatabaseOptions,
    ) -> Result<Self, DatabaseError> {
        if Self::exists(directory, name) {
            Self::open(directory, name, options)
        } else {
            Self::create(directory, name, options)
        }
    }

    /// Check whether file 0 of a database exists.
    #[must_use]
    pub fn exists(directory: &Path, name: &str) -> bool {
        PagedStore::path_for(directory, name, 0).exists()
    }
}

impl<T: TimeSource> Database<T> {
    /// Create a new database whose FCB timestamps come from `time_source`.
    pub fn create_with_time_source(
        directory: &Path,
        name: &str,
        options: DatabaseOptions,
        time_source: T,
    ) -> Result<Self, DatabaseError> {
        check_order(options.btree_order)?;
        let stores = StoreSet::create(directory, name, options.blocks_per_file)?;
        tracing::info!(
            "Created database '{}' ({} blocks per file)",
            name,
            options.blocks_per_file
        );
        Ok(Self {
            stores,
            directory: Directory::new()?,
            btree_order: options.btree_order,
            time_source,
        })
    }

    /// Open an existing database whose FCB timestamps come from `time_source`.
    ///
    /// The block count per file is read from the files themselves;
    /// `options.blocks_per_file` only applies to databases being created.
    pub fn open_with_time_source(
        directory: &Path,
        name: &str,
        options: DatabaseOptions,
        time_source: T,
    ) -> Result<Self, DatabaseError> {
        check_order(options.btree_order)?;
        let mut database = Self {
            stores: StoreSet::open(directory, name)?,
            directory: Directory::new()?,
            btree_order: options.btree_order,
            time_source,
        };

        let listed = database.directory.list(&database.stores)?.len();
        let stored = database.stores.superblock()?.fcb_count;
        if stored != listed.min(MAX_STORED_FCB_COUNT) {
            tracing::warn!(
                "Superblock of '{}' counts {} files, directory holds {}",
                name,
                stored,
                listed
            );
            database.sync_fcb_count(listed)?;
        }

        tracing::info!(
            "Opened database '{}': {} paged files, {} stored files",
            name,
            database.stores.file_count(),
            listed
        );
        Ok(database)
    }

    /// Get the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.stores.database_name()
    }

    #[must_use]
    pub const fn btree_order(&self) -> usize {
        self.btree_order
    }

    /// Get the underlying paged files.
    #[must_use]
    pub const fn stores(&self) -> &StoreSet {
        &self.stores
    }

    /// Get the number of paged files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.stores.file_count()
    }

    /// Get the number of free blocks across all paged files.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.stores.free_count()
    }

    /// Write records as a data chain and index them.
    ///
    /// Keys are checked for duplicates before anything is written. Returns
    /// the data and index roots and the number of blocks used.
    pub fn build_index(&mut self, records: &[Record]) -> Result<BuiltFile, DatabaseError> {
        let mut keys = HashSet::with_capacity(records.len());
        if let Some(duplicate) = records.iter().find(|r| !keys.insert(r.key())) {
            return Err(DatabaseError::BTree(BTreeError::DuplicateKey(
                duplicate.key(),
            )));
        }
        if records.is_empty() {
            return Ok(BuiltFile {
                data_root: None,
                index_root: None,
                data_blocks: 0,
                index_blocks: 0,
            });
        }

        let chain = self.stores.append_records(records)?;
        let tree = BTreeIndex::from_entries(self.btree_order, chain.key_pointers)?;
        let index_root = persist_tree(&tree, &mut self.stores)?;

        tracing::debug!(
            "Indexed {} records: {} data blocks, {} index blocks (height {})",
            records.len(),
            chain.blocks_written,
            tree.node_count(),
            tree.height()
        );

        Ok(BuiltFile {
            data_root: chain.start,
            index_root: Some(index_root),
            data_blocks: chain.blocks_written,
            index_blocks: tree.node_count(),
        })
    }

    /// Store records as a new file and add it to the directory.
    pub fn append_file(&mut self, name: &str, records: &[Record]) -> Result<Fcb, DatabaseError> {
        validate_name(name)?;
        if self.directory.find_by_name(&self.stores, name)?.is_some() {
            return Err(DatabaseError::DuplicateFile(name.to_string()));
        }

        let built = self.build_index(records)?;
        let fcb = Fcb {
            name: name.to_string(),
            created: format_timestamp(self.time_source.now_ms()),
            block_count: built.block_count(),
            data_root: built.data_root,
            index_root: built.index_root,
        };
        self.directory.append(&mut self.stores, &fcb)?;
        let listed = self.directory.list(&self.stores)?.len();
        self.sync_fcb_count(listed)?;

        tracing::info!(
            "Stored file '{}' in '{}': {} records, {} blocks",
            name,
            self.name(),
            records.len(),
            fcb.block_count
        );
        Ok(fcb)
    }

    /// Find the record with `key` in a stored file.
    pub fn lookup(&self, name: &str, key: i32) -> Result<Option<FoundRecord>, DatabaseError> {
        let fcb = self.find_file(name)?;
        let Some(root) = fcb.index_root else {
            return Ok(None);
        };

        match search(&self.stores, root, key)? {
            Lookup::Found {
                pointer,
                blocks_visited,
            } => {
                let record = self.stores.read_record(pointer)?;
                let blocks_read = blocks_visited + 1;
                tracing::debug!("Found key {} in '{}' after {} block reads", key, name, blocks_read);
                Ok(Some(FoundRecord {
                    record,
                    blocks_read,
                }))
            }
            Lookup::NotFound { blocks_visited } => {
                tracing::debug!(
                    "Key {} not in '{}' after {} block reads",
                    key,
                    name,
                    blocks_visited
                );
                Ok(None)
            }
        }
    }

    /// Read every record of a stored file in load order.
    pub fn read_file(&self, name: &str) -> Result<Vec<Record>, DatabaseError> {
        let fcb = self.find_file(name)?;
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut current = fcb.data_root;

        while let Some(pointer) = current {
            if !seen.insert(pointer) {
                return Err(DatabaseError::CorruptChain(pointer));
            }
            let block = self.stores.read_block(pointer)?;
            for slot in 0..RECORDS_PER_BLOCK {
                let bytes = block.read_bytes(slot * RECORD_SIZE, RECORD_SIZE);
                if bytes.iter().all(|&b| b == FILL_BYTE) {
                    break;
                }
                records.push(Record::new(bytes)?);
            }
            current = block.next_pointer()?;
        }

        Ok(records)
    }

    /// Remove a stored file and free its blocks. Returns the freed blocks.
    pub fn remove(&mut self, name: &str) -> Result<Vec<BlockPointer>, DatabaseError> {
        let reclaimed = self
            .directory
            .remove(&mut self.stores, name)
            .map_err(|e| match e {
                DirectoryError::NotFound(name) => DatabaseError::FileNotFound(name),
                other => DatabaseError::Directory(other),
            })?;
        let listed = self.directory.list(&self.stores)?.len();
        self.sync_fcb_count(listed)?;
        Ok(reclaimed)
    }

    /// Every stored file, in directory order.
    pub fn directory_list(&self) -> Result<Vec<Fcb>, DatabaseError> {
        Ok(self.directory.list(&self.stores)?)
    }

    fn find_file(&self, name: &str) -> Result<Fcb, DatabaseError> {
        self.directory
            .find_by_name(&self.stores, name)?
            .ok_or_else(|| DatabaseError::FileNotFound(name.to_string()))
    }

    fn sync_fcb_count(&mut self, count: usize) -> Result<(), DatabaseError> {
        self.stores.superblock_mut()?.fcb_count = count.min(MAX_STORED_FCB_COUNT);
        self.stores.store_mut(0)?.persist()?;
        Ok(())
    }
}

const fn check_order(order: usize) -> Result<(), DatabaseError> {
    if order < MIN_ORDER || order > MAX_ORDER {
        return Err(DatabaseError::BTree(BTreeError::InvalidOrder(order)));
    }
    Ok(())
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// I/O error outside the paged files.
    Io(std::io::Error),
    /// Paged file error.
    Store(StoreError),
    /// Directory error.
    Directory(DirectoryError),
    /// Persisted index error.
    Index(IndexError),
    /// B-tree error.
    BTree(BTreeError),
    /// Record or pointer encoding error.
    Codec(CodecError),
    /// No stored file with that name.
    FileNotFound(String),
    /// A stored file with that name already exists.
    DuplicateFile(String),
    /// No database with that name.
    DatabaseNotFound(String),
    /// Database name not usable as a file name.
    InvalidDatabaseName(String),
    /// A data chain revisits a block.
    CorruptChain(BlockPointer),
    /// A lock was poisoned.
    LockPoisoned,
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Directory(e) => write!(f, "directory error: {e}"),
            Self::Index(e) => write!(f, "index error: {e}"),
            Self::BTree(e) => write!(f, "B-tree error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::FileNotFound(name) => write!(f, "file not found: {name}"),
            Self::DuplicateFile(name) => write!(f, "file already exists: {name}"),
            Self::DatabaseNotFound(name) => write!(f, "database not found: {name}"),
            Self::InvalidDatabaseName(name) => write!(f, "invalid database name: '{name}'"),
            Self::CorruptChain(pointer) => write!(f, "data chain revisits block {pointer}"),
            Self::LockPoisoned => write!(f, "lock poisoned"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Directory(e) => Some(e),
            Self::Index(e) => Some(e),
            Self::BTree(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::FileNotFound(_)
            | Self::DuplicateFile(_)
            | Self::DatabaseNotFound(_)
            | Self::InvalidDatabaseName(_)
            | Self::CorruptChain(_)
            | Self::LockPoisoned => None,
        }
    }
}

impl From<StoreError> for DatabaseError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<DirectoryError> for DatabaseError {
    fn from(e: DirectoryError) -> Self {
        Self::Directory(e)
    }
}

impl From<IndexError> for DatabaseError {
    fn from(e: IndexError) -> Self {
        Self::Index(e)
    }
}

impl From<BTreeError> for DatabaseError {
    fn from(e: BTreeError) -> Self {
        Self::BTree(e)
    }
}

impl From<CodecError> for DatabaseError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}
