// Life of a bulk load:
// 1. Caller hands over already-decoded 40-byte records
// 2. Records are packed 6 per block into a chain of data blocks
// 3. A B-tree of order m is built in memory over (key, data pointer)
// 4. The tree is written one node per block, children resolved to pointers
// 5. An FCB with the data root and index root joins the directory
//
// System components:
//  - Paged files with hex bitmaps (storage::file, storage::allocator)
//  - Fixed-width pointer codec (storage::pointer)
//  - B-tree index (storage::btree)
//  - FCB directory (storage::directory)
//  - Registry of open databases (database_registry)

pub mod config;
pub mod database_registry;
mod e2e_tests;
pub mod storage;

pub use database_registry::DatabaseRegistry;
