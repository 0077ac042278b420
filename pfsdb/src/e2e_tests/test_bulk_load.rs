//! Bulk load a file and read it back by key and in full.

use super::helpers::{TestDatabase, records};

#[test]
fn test_bulk_load_and_lookup_every_key() {
    let mut test = TestDatabase::new(4000, 11);
    let free_before = test.db.free_count();
    let input = records("movie", (1..=100).rev());

    let fcb = test.db.append_file("movies", &input).expect("append");

    // 100 records at 6 per block.
    let data_blocks = 17;
    assert!(fcb.block_count > data_blocks);
    assert_eq!(test.db.free_count(), free_before - fcb.block_count);
    assert_eq!(fcb.data_root.expect("data root").to_string(), "0000006");
    assert_eq!(fcb.created, "05/Mar/24:14PM");

    for key in 1..=100 {
        let found = test
            .db
            .lookup("movies", key)
            .expect("lookup")
            .expect("found");
        assert_eq!(found.record.text(), format!("{key},movie {key}"));
        assert!(found.blocks_read >= 2);
        assert!(found.blocks_read <= 4, "key {key} took {} reads", found.blocks_read);
    }
    assert_eq!(test.db.lookup("movies", 0).expect("lookup"), None);
    assert_eq!(test.db.lookup("movies", 101).expect("lookup"), None);
}

#[test]
fn test_read_file_preserves_load_order() {
    let mut test = TestDatabase::new(4000, 5);
    let input = records("row", [40, -7, 3, 999_999, -999_999, 12, 0]);

    test.db.append_file("rows", &input).expect("append");

    assert_eq!(test.db.read_file("rows").expect("read"), input);
}

#[test]
fn test_two_files_are_independent() {
    let mut test = TestDatabase::new(4000, 5);
    test.db
        .append_file("first", &records("a", 1..=20))
        .expect("append");
    test.db
        .append_file("second", &records("b", 11..=30))
        .expect("append");

    let in_first = test.db.lookup("first", 15).expect("lookup").expect("found");
    let in_second = test.db.lookup("second", 15).expect("lookup").expect("found");
    assert_eq!(in_first.record.text(), "15,a 15");
    assert_eq!(in_second.record.text(), "15,b 15");
    assert_eq!(test.db.lookup("first", 25).expect("lookup"), None);

    let names: Vec<String> = test
        .db
        .directory_list()
        .expect("list")
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, ["first", "second"]);
}
