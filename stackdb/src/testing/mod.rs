//! Database constructors shared by tests.

use tempfile::TempDir;

use crate::database::{Database, DatabaseError};

/// Node size limit used by tests. Small enough that a few kilobytes of
/// data already need several leaves and branch splits.
pub const TEST_NODE_SIZE_LIMIT: usize = 1024;

/// Create a fresh in-memory database with `TEST_NODE_SIZE_LIMIT`.
pub fn new_test_database() -> Result<Database, DatabaseError> {
    Database::in_memory_with_node_size_limit(TEST_NODE_SIZE_LIMIT)
}

/// Create a fresh file-backed database in a temporary directory.
///
/// The directory is removed when the returned guard is dropped.
pub fn new_file_test_database() -> Result<(Database, TempDir), DatabaseError> {
    let dir = tempfile::tempdir().map_err(crate::storage::StoreError::Io)?;
    let db = Database::create(dir.path(), TEST_NODE_SIZE_LIMIT)?;
    Ok((db, dir))
}
