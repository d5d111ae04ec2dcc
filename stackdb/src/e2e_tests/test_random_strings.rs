//! Test random strings of widely varying lengths.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::database::ReadStringOptions;
use crate::e2e_tests::helpers::*;
use crate::types::Value128;

#[test]
fn test_random_strings_read_back() {
    let db = new_test_database().expect("create db");
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let strings: Vec<(Value128, String)> = (0..10)
        .map(|_| {
            let k = Value128::from_parts(rng.random(), rng.random());
            let len = rng.random_range(50..=100_050);
            (k, random_text(&mut rng, len))
        })
        .collect();
    let distinct: BTreeSet<Value128> = strings.iter().map(|(k, _)| *k).collect();
    assert_eq!(distinct.len(), strings.len());

    let txn = db.begin().expect("begin txn");
    for (k, s) in &strings {
        txn.value(*k).expect("open value").write_string(s).expect("write");
    }
    txn.commit().expect("commit");

    let txn = db.begin().expect("begin txn");
    let total: usize = strings.iter().map(|(_, s)| s.len()).sum();
    let report = txn.check_tree_integrity().expect("integrity");
    assert_eq!(report.data_size, i64::try_from(total).expect("fits"));

    for (k, s) in &strings {
        let mut value = txn.value(*k).expect("open value");
        let read = value.read_string(ReadStringOptions::default()).expect("read");
        assert_eq!(&read, s);
    }
}

#[test]
fn test_random_strings_written_in_random_key_order() {
    let db = new_test_database().expect("create db");
    let mut rng = StdRng::seed_from_u64(42);

    let mut written = Vec::new();
    for _ in 0..40 {
        let k = key(rng.random_range(1..1_000_000));
        let s = random_text(&mut rng, 200);
        let txn = db.begin().expect("begin txn");
        let mut value = txn.value(k).expect("open value");
        value.set_position(-1).expect("seek to end");
        value.write_string(&s).expect("write");
        txn.commit().expect("commit");
        written.push((k, s));
    }

    // Keys drawn twice hold both strings, in write order.
    let txn = db.begin().expect("begin txn");
    for (k, _) in &written {
        let expected: String = written
            .iter()
            .filter(|(other, _)| other == k)
            .map(|(_, s)| s.as_str())
            .collect();
        assert_eq!(read_all(&txn, *k), expected.into_bytes());
    }
    txn.check_tree_integrity().expect("integrity");
}
