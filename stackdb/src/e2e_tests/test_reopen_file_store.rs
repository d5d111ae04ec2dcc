//! Test a file-backed database across several reopen cycles.

use crate::database::Database;
use crate::e2e_tests::helpers::*;

#[test]
fn test_data_and_history_survive_reopen() {
    let (db, dir) = new_file_test_database().expect("create db");
    put(&db, key(1), b"first");
    put(&db, key(2), &vec![9u8; 5000]);
    let head = db.head().expect("head");
    drop(db);

    let db = Database::open(dir.path()).expect("reopen db");
    assert_eq!(db.head().expect("head"), head);
    assert_eq!(db.root_count().expect("count"), 3);
    assert_eq!(db.node_data_byte_size_limit(), TEST_NODE_SIZE_LIMIT);
    assert_eq!(get(&db, key(1)), b"first");
    assert_eq!(get(&db, key(2)), vec![9u8; 5000]);

    // Overwrite part of a stored value, then reopen again.
    let txn = db.begin().expect("begin txn");
    let mut value = txn.value(key(2)).expect("open value");
    value.set_position(4990).expect("seek");
    value.copy_from_buffer(b"0123456789tail").expect("write");
    txn.commit().expect("commit");
    drop(db);

    let db = Database::open_or_create(dir.path(), TEST_NODE_SIZE_LIMIT).expect("reopen db");
    let bytes = get(&db, key(2));
    assert_eq!(bytes.len(), 5004);
    assert_eq!(&bytes[4990..], b"0123456789tail");
    assert!(bytes[..4990].iter().all(|&b| b == 9));

    let txn = db.begin().expect("begin txn");
    assert_eq!(txn.check_tree_integrity().expect("integrity").data_size, 5 + 5004);
}

#[test]
fn test_open_missing_database_fails() {
    let dir = tempfile::tempdir().expect("create temp dir");
    assert!(Database::open(&dir.path().join("nothing")).is_err());
}
