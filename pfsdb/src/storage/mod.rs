//! Paged file storage engine.
//!
//! A database is a set of paged files `<db>.db0`, `<db>.db1`, ... of 256-byte
//! blocks. Every byte on disk is printable ASCII.
//!
//! # File Format
//!
//! - Blocks 0-3: allocation bitmap, one hex digit per 4 blocks (every file)
//! - Block 4: superblock (file 0 only)
//! - Block 5: head of the FCB directory chain (file 0 only)
//! - Remaining blocks: data blocks, index nodes, directory overflow blocks
//!
//! Stored files are chains of data blocks holding 40-byte records, each with
//! a B-tree index persisted one node per block.
//!
//! # Usage
//!
//! ```ignore
//! use pfsdb::storage::{Database, DatabaseOptions, Record};
//!
//! let mut db = Database::open_or_create(dir, "library", DatabaseOptions::default())?;
//!
//! let records = vec![Record::padded("42,The Answer")?];
//! db.append_file("books", &records)?;
//!
//! let found = db.lookup("books", 42)?;
//! ```

pub mod allocator;
pub mod block;
pub mod btree;
mod database;
pub mod directory;
pub mod file;
pub mod pointer;
pub mod record;
pub mod store_set;
pub mod superblock;
pub mod time;

pub use allocator::{AllocatorError, BlockAllocator};
pub use block::{BLOCK_SIZE, Block};
pub use btree::{BTreeError, BTreeIndex, IndexError, Lookup};
pub use database::{BuiltFile, Database, DatabaseError, DatabaseOptions, FoundRecord};
pub use directory::{Directory, DirectoryError, Fcb};
pub use file::{PagedStore, StoreError};
pub use pointer::{BlockPointer, CodecError, DataBlockPointer, KeyPointer};
pub use record::{RECORD_SIZE, Record};
pub use store_set::StoreSet;
pub use superblock::{Superblock, SuperblockError};
pub use time::{FixedTimeSource, SystemTimeSource, TimeSource};
