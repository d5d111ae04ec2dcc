//! Test cursor positioning across leaf and branch boundaries.

use crate::e2e_tests::helpers::*;

#[test]
fn test_seek_twice_gives_same_stack() {
    let db = new_test_database().expect("create db");
    let txn = db.begin().expect("begin txn");
    for n in 1..=40u64 {
        append(&txn, key(n), &[u8::try_from(n).unwrap(); 900]);
    }

    let mut value = txn.value(key(23)).expect("open value");
    value.set_position(450).expect("seek");
    let first = txn.dump_stack_state();
    value.set_position(450).expect("seek");
    assert_eq!(txn.dump_stack_state(), first);
}

#[test]
fn test_every_position_reads_the_right_byte() {
    let db = new_test_database().expect("create db");
    let data: Vec<u8> = (0..4000u32).map(|i| u8::try_from(i % 256).unwrap()).collect();
    put(&db, key(5), &data);
    put(&db, key(6), b"neighbour");

    let txn = db.begin().expect("begin txn");
    let mut value = txn.value(key(5)).expect("open value");
    for pos in (0..4000i64).step_by(97) {
        value.set_position(pos).expect("seek");
        assert_eq!(value.read_u8().expect("read"), Some(data[usize::try_from(pos).unwrap()]));
        // The same byte counted from the end.
        value.set_position(pos - 4001).expect("seek from end");
        assert_eq!(value.read_u8().expect("read"), Some(data[usize::try_from(pos).unwrap()]));
    }
    value.set_position(-1).expect("seek");
    assert_eq!(value.read_u8().expect("read"), None);
    assert!(value.set_position(4001).unwrap_err().is_out_of_range());
}
