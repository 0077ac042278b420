//! Data and index spill into additional paged files.

use super::helpers::{DB_NAME, TestDatabase, records};

#[test]
fn test_load_spills_across_files() {
    let mut test = TestDatabase::new(16, 4);
    let input = records("r", 1..=200);
    test.db.append_file("big", &input).expect("append");

    assert!(test.db.file_count() > 3);
    assert_eq!(
        test.db.stores().superblock().expect("superblock").file_count,
        test.db.file_count()
    );
    let mut expected: Vec<String> = (0..test.db.file_count())
        .map(|seq| format!("{DB_NAME}.db{seq}"))
        .collect();
    expected.sort();
    assert_eq!(test.file_names(), expected);

    for key in [1, 77, 150, 200] {
        let found = test.db.lookup("big", key).expect("lookup").expect("found");
        assert_eq!(found.record.key(), key);
    }
    assert_eq!(test.db.read_file("big").expect("read"), input);
}

#[test]
fn test_reopen_loads_every_file() {
    let mut test = TestDatabase::new(16, 4);
    test.db
        .append_file("big", &records("r", 1..=120))
        .expect("append");
    let file_count = test.db.file_count();

    let test = test.reopen();
    assert_eq!(test.db.file_count(), file_count);
    let found = test.db.lookup("big", 119).expect("lookup").expect("found");
    assert_eq!(found.record.text(), "119,r 119");
}

#[test]
fn test_removed_blocks_in_later_files_are_freed() {
    let mut test = TestDatabase::new(16, 4);
    let free_before = test.db.free_count();
    test.db
        .append_file("big", &records("r", 1..=120))
        .expect("append");
    let file_count = test.db.file_count();

    let reclaimed = test.db.remove("big").expect("remove");
    assert!(reclaimed.iter().any(|p| p.file() > 0));

    // Files stay; their blocks are free again.
    assert_eq!(test.db.file_count(), file_count);
    let added_capacity = (file_count - 1) * (16 - 4);
    assert_eq!(test.db.free_count(), free_before + added_capacity);
}
