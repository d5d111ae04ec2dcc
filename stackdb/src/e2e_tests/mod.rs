//! End-to-end tests at the database level.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! to verify writes, commits and reads through the public API.

#![cfg(test)]

mod helpers;

mod test_append_equivalence;
mod test_branch_split;
mod test_random_strings;
mod test_reopen_file_store;
mod test_root_chain_conflict;
mod test_round_trip;
mod test_seek;
mod test_snapshot_isolation;
