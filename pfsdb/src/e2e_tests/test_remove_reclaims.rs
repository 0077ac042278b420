//! Removing a file frees exactly the blocks it owns.

use super::helpers::{TestDatabase, records, used_blocks};

#[test]
fn test_remove_frees_exactly_owned_blocks() {
    let mut test = TestDatabase::new(4000, 4);
    test.db
        .append_file("keep", &records("keep", 1..=40))
        .expect("append");
    let before = used_blocks(test.db.stores());

    test.db
        .append_file("drop", &records("drop", 1..=75))
        .expect("append");
    let during = used_blocks(test.db.stores());
    let owned: Vec<_> = during.difference(&before).copied().collect();

    let mut reclaimed = test.db.remove("drop").expect("remove");
    reclaimed.sort();
    assert_eq!(reclaimed, owned);
    assert_eq!(used_blocks(test.db.stores()), before);

    // The surviving file is untouched.
    assert_eq!(
        test.db.read_file("keep").expect("read"),
        records("keep", 1..=40)
    );
}

#[test]
fn test_freed_blocks_are_reused() {
    let mut test = TestDatabase::new(4000, 6);
    let first = test
        .db
        .append_file("first", &records("x", 1..=30))
        .expect("append");
    test.db.remove("first").expect("remove");

    let second = test
        .db
        .append_file("second", &records("y", 1..=30))
        .expect("append");
    assert_eq!(second.data_root, first.data_root);
    assert_eq!(second.block_count, first.block_count);
}

#[test]
fn test_remove_everything_returns_to_empty() {
    let mut test = TestDatabase::new(4000, 3);
    let empty = test.db.free_count();
    for name in ["a", "b", "c"] {
        test.db
            .append_file(name, &records(name, 1..=25))
            .expect("append");
    }
    for name in ["b", "a", "c"] {
        test.db.remove(name).expect("remove");
    }

    assert_eq!(test.db.free_count(), empty);
    assert!(test.db.directory_list().expect("list").is_empty());
}
