//! Test a value surviving commit and reopen.

use crate::database::Database;
use crate::e2e_tests::helpers::*;
use crate::types::Value128;

#[test]
fn test_zero_filled_value_round_trips_through_disk() {
    let k1 = Value128::from_hex("0123456789abcdef0011223344556677").expect("valid key");
    let (db, dir) = new_file_test_database().expect("create db");

    put(&db, k1, &[0u8; 1024]);
    assert_eq!(get(&db, k1), vec![0u8; 1024]);
    drop(db);

    let db = Database::open(dir.path()).expect("reopen db");
    let txn = db.begin().expect("begin txn");
    assert_eq!(txn.key_size(k1).expect("size"), 1024);
    assert_eq!(read_all(&txn, k1), vec![0u8; 1024]);
    assert_eq!(txn.check_tree_integrity().expect("integrity").data_size, 1024);
}

#[test]
fn test_missing_key_reads_nothing() {
    let db = new_test_database().expect("create db");
    let txn = db.begin().expect("begin txn");
    let mut value = txn.value(key(77)).expect("open value");
    assert_eq!(value.size().expect("size"), 0);
    assert_eq!(value.read_u8().expect("read"), None);
    let mut buf = [0u8; 16];
    assert_eq!(value.copy_to_buffer(&mut buf).expect("read"), 0);
}
