//! Common helpers for end-to-end tests.

use rand::Rng;
use rand::rngs::StdRng;

use crate::database::{CommitOutcome, Database, Transaction};
use crate::tree::Key;
use crate::types::Value128;

pub use crate::testing::{TEST_NODE_SIZE_LIMIT, new_file_test_database, new_test_database};

/// A small key.
pub fn key(n: u64) -> Key {
    Value128::from_parts(0, n)
}

/// Append `bytes` to `key` within `txn`.
pub fn append(txn: &Transaction, key: Key, bytes: &[u8]) {
    let mut value = txn.value(key).expect("open value");
    value.set_position(-1).expect("seek to end");
    assert_eq!(value.copy_from_buffer(bytes).expect("write"), bytes.len());
}

/// Read every byte of `key` within `txn`.
pub fn read_all(txn: &Transaction, key: Key) -> Vec<u8> {
    let size = txn.key_size(key).expect("key size");
    let mut value = txn.value(key).expect("open value");
    let mut buf = vec![0u8; usize::try_from(size).expect("size fits")];
    assert_eq!(value.copy_to_buffer(&mut buf).expect("read"), buf.len());
    buf
}

/// Append `bytes` to `key` in a transaction of its own.
pub fn put(db: &Database, key: Key, bytes: &[u8]) -> CommitOutcome {
    let txn = db.begin().expect("begin txn");
    append(&txn, key, bytes);
    txn.commit().expect("commit")
}

/// Read every byte of `key` in a fresh transaction.
pub fn get(db: &Database, key: Key) -> Vec<u8> {
    let txn = db.begin().expect("begin txn");
    let bytes = read_all(&txn, key);
    txn.abort();
    bytes
}

/// `len` random lowercase ASCII letters.
pub fn random_text(rng: &mut StdRng, len: usize) -> String {
    (0..len).map(|_| char::from(rng.random_range(b'a'..=b'z'))).collect()
}
