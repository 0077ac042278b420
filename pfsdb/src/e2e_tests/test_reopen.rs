//! Everything written survives closing and reopening the database.

use super::helpers::{TestDatabase, records};

#[test]
fn test_reopen_keeps_files_and_indexes() {
    let mut test = TestDatabase::new(4000, 5);
    test.db
        .append_file("books", &records("book", 1..=50))
        .expect("append");
    test.db
        .append_file("films", &records("film", 100..=120))
        .expect("append");
    let listing = test.db.directory_list().expect("list");
    let free = test.db.free_count();

    let test = test.reopen();

    assert_eq!(test.db.directory_list().expect("list"), listing);
    assert_eq!(test.db.free_count(), free);
    let found = test.db.lookup("films", 110).expect("lookup").expect("found");
    assert_eq!(found.record.text(), "110,film 110");
    assert_eq!(
        test.db.read_file("books").expect("read"),
        records("book", 1..=50)
    );
    assert_eq!(test.db.stores().superblock().expect("superblock").fcb_count, 2);
}

#[test]
fn test_append_after_reopen_does_not_overwrite() {
    let mut test = TestDatabase::new(4000, 5);
    test.db
        .append_file("old", &records("old", 1..=30))
        .expect("append");

    let mut test = test.reopen();
    test.db
        .append_file("new", &records("new", 1..=30))
        .expect("append");

    assert_eq!(
        test.db.read_file("old").expect("read"),
        records("old", 1..=30)
    );
    assert_eq!(
        test.db.read_file("new").expect("read"),
        records("new", 1..=30)
    );
}

#[test]
fn test_removal_survives_reopen() {
    let mut test = TestDatabase::new(4000, 5);
    test.db
        .append_file("temp", &records("t", 1..=30))
        .expect("append");
    test.db.remove("temp").expect("remove");
    let free = test.db.free_count();

    let test = test.reopen();
    assert_eq!(test.db.free_count(), free);
    assert!(test.db.directory_list().expect("list").is_empty());
}
