// Life of a write:
// 1. A transaction parks its tree stack on a key
// 2. The path to the touched leaves is copied into private buffers
// 3. Bytes are written into those buffers; new leaves split branches
// 4. Commit writes every private node in one batch
// 5. The new root is appended to the root chain if nobody else committed
//
// System components:
//  - Node store (heap or file backed)
//  - Root chain (heap or file backed)
//  - Tree stack
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod database;
pub mod storage;
#[cfg(test)]
mod testing;
pub mod tree;
pub mod types;

#[cfg(test)]
mod e2e_tests;

pub use database::{
    CommitOutcome, DataValue, Database, DatabaseError, ReadStringOptions, StringEncoding, Transaction,
    TransactionError,
};
