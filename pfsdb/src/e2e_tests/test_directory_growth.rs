//! The directory grows past one block and keeps its order.

use super::helpers::{TestDatabase, records};

fn names(test: &TestDatabase) -> Vec<String> {
    test.db
        .directory_list()
        .expect("list")
        .into_iter()
        .map(|f| f.name)
        .collect()
}

#[test]
fn test_directory_spans_blocks() {
    let mut test = TestDatabase::new(4000, 5);
    let expected: Vec<String> = (1..=10).map(|i| format!("file{i}")).collect();
    for (i, name) in (1..).zip(&expected) {
        test.db
            .append_file(name, &records(name, i * 10..i * 10 + 3))
            .expect("append");
    }

    assert_eq!(names(&test), expected);
    // The stored count is a single digit.
    assert_eq!(test.db.stores().superblock().expect("superblock").fcb_count, 9);

    let found = test.db.lookup("file9", 91).expect("lookup").expect("found");
    assert_eq!(found.record.text(), "91,file9 91");

    let test = test.reopen();
    assert_eq!(names(&test), expected);
}

#[test]
fn test_remove_from_first_block_keeps_order() {
    let mut test = TestDatabase::new(4000, 5);
    for name in ["a", "b", "c", "d", "e", "f"] {
        test.db
            .append_file(name, &records(name, 1..=3))
            .expect("append");
    }

    test.db.remove("b").expect("remove");
    assert_eq!(names(&test), ["a", "c", "d", "e", "f"]);

    // The gap in the first block is filled before the second block.
    test.db
        .append_file("g", &records("g", 1..=3))
        .expect("append");
    assert_eq!(names(&test), ["a", "c", "d", "g", "e", "f"]);
}

#[test]
fn test_duplicate_names_rejected_across_blocks() {
    let mut test = TestDatabase::new(4000, 5);
    for name in ["a", "b", "c", "d", "e"] {
        test.db
            .append_file(name, &records(name, 1..=3))
            .expect("append");
    }
    assert!(test.db.append_file("e", &records("e", 1..=3)).is_err());
    assert_eq!(names(&test).len(), 5);
}
