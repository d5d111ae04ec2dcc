//! Test enough leaves to split branches several times.

use crate::e2e_tests::helpers::*;
use crate::types::Value128;

fn block(n: u64) -> Vec<u8> {
    (0..1024u64).map(|i| u8::try_from((i * 7 + n) % 251).unwrap()).collect()
}

#[test]
fn test_branch_splits_preserve_every_value() {
    let db = new_test_database().expect("create db");

    let txn = db.begin().expect("begin txn");
    for n in 0..70u64 {
        append(&txn, key(100 + n), &block(n));
    }
    let big = Value128::from_hex("00f20000000000000000000000abcd7").expect("valid key");
    let big_data: Vec<u8> = (0..12_800u32).map(|i| u8::try_from(i % 199).unwrap()).collect();
    append(&txn, big, &big_data);

    let report = txn.check_tree_integrity().expect("integrity");
    assert_eq!(report.data_size, 70 * 1024 + 12_800);
    assert!(report.depth >= 3, "{}", txn.dump_tree_branches().expect("dump"));
    txn.commit().expect("commit");

    let txn = db.begin().expect("begin txn");
    assert_eq!(txn.check_tree_integrity().expect("integrity").data_size, 70 * 1024 + 12_800);
    for n in 0..70u64 {
        assert_eq!(read_all(&txn, key(100 + n)), block(n));
    }
    assert_eq!(read_all(&txn, big), big_data);
}

#[test]
fn test_splits_across_many_commits() {
    let db = new_test_database().expect("create db");
    for n in 0..60u64 {
        // Interleave low and high keys so inserts land all over the tree.
        let k = if n % 2 == 0 { key(n + 1) } else { key(1_000_000 - n) };
        put(&db, k, &block(n)[..300]);
    }
    let txn = db.begin().expect("begin txn");
    let report = txn.check_tree_integrity().expect("integrity");
    assert_eq!(report.data_size, 60 * 300);
    assert_eq!(db.root_count().expect("count"), 61);
}
