//! Lookup block-read accounting on a known tree shape.
//!
//! With order 5 and these keys inserted in order, the tree has three levels:
//! the root holds 49, its children hold [30, 44] and [62].

use super::helpers::{TestDatabase, records};

const KEYS: [i32; 16] = [29, 41, 44, 62, 46, 49, 27, 76, 91, 30, 100, 47, 34, 53, 9, 45];

#[test]
fn test_blocks_read_follow_depth() {
    let mut test = TestDatabase::new(4000, 5);
    test.db
        .append_file("scenario", &records("key", KEYS))
        .expect("append");

    // Index nodes on the path plus one data block.
    for (key, expected) in [(49, 2), (30, 3), (44, 3), (62, 3), (9, 4), (53, 4), (100, 4)] {
        let found = test
            .db
            .lookup("scenario", key)
            .expect("lookup")
            .expect("found");
        assert_eq!(found.blocks_read, expected, "key {key}");
        assert_eq!(found.record.key(), key);
    }
}

#[test]
fn test_missing_keys_are_not_found() {
    let mut test = TestDatabase::new(4000, 5);
    test.db
        .append_file("scenario", &records("key", KEYS))
        .expect("append");

    for key in [0, 28, 48, 1000, -5] {
        assert_eq!(test.db.lookup("scenario", key).expect("lookup"), None, "key {key}");
    }
}

#[test]
fn test_index_block_count() {
    let mut test = TestDatabase::new(4000, 5);
    let built = test.db.build_index(&records("key", KEYS)).expect("build");

    // 16 records fill 3 data blocks; the tree has 8 nodes.
    assert_eq!(built.data_blocks, 3);
    assert_eq!(built.index_blocks, 8);
}
