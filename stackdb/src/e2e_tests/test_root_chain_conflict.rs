//! Test optimistic concurrency between transactions.

use crate::database::CommitOutcome;
use crate::e2e_tests::helpers::*;

#[test]
fn test_losing_transaction_retries_on_new_head() {
    let db = new_test_database().expect("create db");
    put(&db, key(1), b"base");

    let winner = db.begin().expect("begin txn");
    let loser = db.begin().expect("begin txn");
    append(&winner, key(1), b"+winner");
    append(&loser, key(1), b"+loser");

    assert!(matches!(
        winner.commit().expect("commit"),
        CommitOutcome::Committed { .. }
    ));
    let err = loser.commit().expect_err("stale root must conflict");
    assert!(err.is_conflict(), "{err}");

    // Redo the work on top of the winner.
    put(&db, key(1), b"+loser");
    assert_eq!(get(&db, key(1)), b"base+winner+loser");
    // Bootstrap, base, winner and the retry.
    assert_eq!(db.root_count().expect("count"), 4);
}

#[test]
fn test_read_only_transactions_never_conflict() {
    let db = new_test_database().expect("create db");
    put(&db, key(1), b"x");

    let reader = db.begin().expect("begin txn");
    assert_eq!(read_all(&reader, key(1)), b"x");
    put(&db, key(1), b"y");
    assert_eq!(reader.commit().expect("commit"), CommitOutcome::NoChanges);
}
