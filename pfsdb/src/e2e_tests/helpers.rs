//! Common helpers for end-to-end tests.

use std::collections::BTreeSet;

use tempfile::TempDir;

use crate::storage::{
    BlockPointer, Database, DatabaseOptions, FixedTimeSource, Record, StoreSet,
};

/// 2024-03-05 14:30:00 UTC
pub const NOW: FixedTimeSource = FixedTimeSource(1_709_649_000_000);

/// Name every test database is created under.
pub const DB_NAME: &str = "e2e";

/// A database in its own temporary directory, removed on drop.
pub struct TestDatabase {
    pub db: Database<FixedTimeSource>,
    options: DatabaseOptions,
    dir: TempDir,
}

impl TestDatabase {
    /// Create a fresh database with the given sizing.
    #[must_use]
    pub fn new(blocks_per_file: usize, btree_order: usize) -> Self {
        let options = DatabaseOptions {
            blocks_per_file,
            btree_order,
        };
        #[allow(clippy::expect_used)]
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        #[allow(clippy::expect_used)]
        let db = Database::create_with_time_source(dir.path(), DB_NAME, options, NOW)
            .expect("Failed to create test database");
        Self { db, options, dir }
    }

    /// Close the database and open it again from disk.
    #[must_use]
    pub fn reopen(self) -> Self {
        let Self { db, options, dir } = self;
        drop(db);
        #[allow(clippy::expect_used)]
        let db = Database::open_with_time_source(dir.path(), DB_NAME, options, NOW)
            .expect("Failed to reopen test database");
        Self { db, options, dir }
    }

    /// Names of the files in the database directory, sorted.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .expect("read dir")
            .map(|e| {
                e.expect("dir entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }
}

/// Records `"<key>,<label> <key>"` for each key, in the given order.
#[must_use]
#[allow(clippy::expect_used)]
pub fn records(label: &str, keys: impl IntoIterator<Item = i32>) -> Vec<Record> {
    keys.into_iter()
        .map(|k| Record::padded(&format!("{k},{label} {k}")).expect("record"))
        .collect()
}

/// Every block currently marked used, across all paged files.
#[must_use]
#[allow(clippy::expect_used)]
pub fn used_blocks(stores: &StoreSet) -> BTreeSet<BlockPointer> {
    let mut used = BTreeSet::new();
    for store in stores.stores() {
        for block in 0..store.total_blocks() {
            let pointer = store
                .pointer(u16::try_from(block).expect("block id"))
                .expect("pointer");
            if stores.is_used(pointer) {
                used.insert(pointer);
            }
        }
    }
    used
}
