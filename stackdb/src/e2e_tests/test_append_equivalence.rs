//! Test that splitting an append into pieces changes nothing.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::e2e_tests::helpers::*;

#[test]
fn test_one_append_equals_many_appends() {
    let mut rng = StdRng::seed_from_u64(7);
    let data: Vec<u8> = (0..6000).map(|_| rng.random()).collect();

    let whole = new_test_database().expect("create db");
    put(&whole, key(3), &data);

    let pieces = new_test_database().expect("create db");
    let mut offset = 0;
    for len in [1usize, 700, 323, 1024, 2000, 1952] {
        put(&pieces, key(3), &data[offset..offset + len]);
        offset += len;
    }
    assert_eq!(offset, data.len());

    assert_eq!(get(&whole, key(3)), data);
    assert_eq!(get(&pieces, key(3)), data);

    let a = whole.begin().expect("begin txn").check_tree_integrity().expect("integrity");
    let b = pieces.begin().expect("begin txn").check_tree_integrity().expect("integrity");
    assert_eq!(a.tree_size, b.tree_size);
    assert_eq!(a.data_size, 6000);
}

#[test]
fn test_appends_to_neighbouring_keys_stay_separate() {
    let db = new_test_database().expect("create db");
    let txn = db.begin().expect("begin txn");
    for round in 0..5u8 {
        for n in 1..=3u64 {
            append(&txn, key(n), &[round; 400]);
        }
    }
    for n in 1..=3u64 {
        let expected: Vec<u8> = (0..5u8).flat_map(|r| [r; 400]).collect();
        assert_eq!(read_all(&txn, key(n)), expected);
    }
    assert_eq!(txn.check_tree_integrity().expect("integrity").data_size, 3 * 2000);
}
