//! Test that transactions only see the root they started from.

use crate::e2e_tests::helpers::*;

#[test]
fn test_old_snapshot_is_unchanged_by_later_commits() {
    let db = new_test_database().expect("create db");
    put(&db, key(1), &[1u8; 3000]);

    let old = db.begin().expect("begin txn");

    let txn = db.begin().expect("begin txn");
    let mut value = txn.value(key(1)).expect("open value");
    value.set_position(1500).expect("seek");
    value.copy_from_buffer(&[2u8; 100]).expect("write");
    append(&txn, key(2), b"new key");
    txn.commit().expect("commit");

    assert_eq!(read_all(&old, key(1)), vec![1u8; 3000]);
    assert_eq!(old.key_size(key(2)).expect("size"), 0);

    let new = get(&db, key(1));
    assert_eq!(&new[1500..1600], &[2u8; 100]);
    assert_eq!(new.iter().filter(|&&b| b == 1).count(), 2900);
    assert_eq!(get(&db, key(2)), b"new key");
}

#[test]
fn test_aborted_work_is_invisible() {
    let db = new_test_database().expect("create db");
    put(&db, key(1), b"kept");

    let txn = db.begin().expect("begin txn");
    append(&txn, key(1), b" and dropped");
    assert_eq!(read_all(&txn, key(1)), b"kept and dropped");
    txn.abort();

    assert_eq!(get(&db, key(1)), b"kept");
}
