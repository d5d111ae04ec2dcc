//! High-level database interface.
//!
//! A `Database` ties a durable node store to a root chain. Every
//! transaction starts from the newest root in the chain, builds a private
//! copy-on-write tree, and on commit appends its new root, provided nobody
//! else committed in the meantime.
//!
//! # Usage
//!
//! ```ignore
//! let db = Database::in_memory()?;
//! let txn = db.begin()?;
//! let mut value = txn.value(key)?;
//! value.write_string("hello")?;
//! txn.commit()?;
//! ```

mod data_value;
mod transaction;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

pub use data_value::{DataValue, ReadStringOptions, StringEncoding};
pub use transaction::{CommitOutcome, Transaction, TransactionError};

use crate::storage::{
    Addr, FileRootChain, FileStore, HeapRootChain, HeapStore, NodeStore, RootChain, RootChainError,
    RootEntry, StoreBackend, StoreError,
};
use crate::tree::{TreeError, branch, create_empty_tree};

/// Name of the node file inside a database directory.
pub const NODES_FILE_NAME: &str = "nodes.stackdb";
/// Name of the root chain file inside a database directory.
pub const ROOTS_FILE_NAME: &str = "roots.stackdb";

/// A database instance.
///
/// Cheap to share: transactions hold their own handles to the backends.
pub struct Database {
    store: Arc<dyn StoreBackend>,
    chain: Arc<dyn RootChain>,
}

impl Database {
    /// Create a database that lives only in memory.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::with_backends(Arc::new(HeapStore::new()), Arc::new(HeapRootChain::new()))
    }

    /// Create an in-memory database with a custom node size limit.
    pub fn in_memory_with_node_size_limit(node_size_limit: usize) -> Result<Self, DatabaseError> {
        Self::with_backends(
            Arc::new(HeapStore::with_node_size_limit(node_size_limit)),
            Arc::new(HeapRootChain::new()),
        )
    }

    /// Create a new database in `dir`.
    ///
    /// The directory is created if needed; the database files must not
    /// already exist.
    pub fn create(dir: &Path, node_size_limit: usize) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(dir).map_err(StoreError::Io)?;
        let store = FileStore::create(&dir.join(NODES_FILE_NAME), node_size_limit)?;
        let chain = FileRootChain::create(&dir.join(ROOTS_FILE_NAME))?;
        info!(dir = %dir.display(), node_size_limit, "created database");
        Self::with_backends(Arc::new(store), Arc::new(chain))
    }

    /// Open an existing database in `dir`.
    pub fn open(dir: &Path) -> Result<Self, DatabaseError> {
        let store = FileStore::open(&dir.join(NODES_FILE_NAME))?;
        let chain = FileRootChain::open(&dir.join(ROOTS_FILE_NAME))?;
        info!(dir = %dir.display(), "opened database");
        Self::with_backends(Arc::new(store), Arc::new(chain))
    }

    /// Open the database in `dir`, creating it if it doesn't exist.
    pub fn open_or_create(dir: &Path, node_size_limit: usize) -> Result<Self, DatabaseError> {
        if dir.join(NODES_FILE_NAME).exists() {
            Self::open(dir)
        } else {
            Self::create(dir, node_size_limit)
        }
    }

    /// Assemble a database from explicit backends, bootstrapping an empty
    /// tree if the root chain has no entries yet.
    pub fn with_backends(
        store: Arc<dyn StoreBackend>,
        chain: Arc<dyn RootChain>,
    ) -> Result<Self, DatabaseError> {
        let limit = store.node_data_byte_size_limit();
        if limit < branch::MAX_BRANCH_BYTES {
            return Err(DatabaseError::NodeSizeLimitTooSmall {
                limit,
                required: branch::MAX_BRANCH_BYTES,
            });
        }
        let db = Self { store, chain };
        db.bootstrap()?;
        Ok(db)
    }

    /// Write the empty tree and make it the first root.
    ///
    /// Returns the new root, or `None` if the chain already had one.
    pub fn bootstrap(&self) -> Result<Option<Addr>, DatabaseError> {
        if self.chain.last_entry()?.is_some() {
            return Ok(None);
        }
        let mut nodes = NodeStore::new(Arc::clone(&self.store));
        let root = create_empty_tree(&mut nodes)?;
        let stored = nodes.write_all(&[root])?;
        let root = *stored
            .first()
            .ok_or_else(|| StoreError::Corruption("empty tree was not written".to_string()))?;
        self.chain.put_entry(root, None)?;
        info!(%root, "bootstrapped empty tree");
        Ok(Some(root))
    }

    /// Newest entry of the root chain.
    pub fn head(&self) -> Result<RootEntry, DatabaseError> {
        self.chain.last_entry()?.ok_or(DatabaseError::NotBootstrapped)
    }

    /// Number of roots ever committed, the bootstrap root included.
    pub fn root_count(&self) -> Result<usize, DatabaseError> {
        Ok(self.chain.len()?)
    }

    #[must_use]
    pub fn node_data_byte_size_limit(&self) -> usize {
        self.store.node_data_byte_size_limit()
    }

    /// Begin a new transaction on the newest root.
    pub fn begin(&self) -> Result<Transaction, DatabaseError> {
        let head = self.head()?;
        let nodes = NodeStore::new(Arc::clone(&self.store));
        Ok(Transaction::new(nodes, Arc::clone(&self.chain), head.addr))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("node_size_limit", &self.store.node_data_byte_size_limit())
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// Node store error.
    Store(StoreError),
    /// Root chain error.
    RootChain(RootChainError),
    /// Tree error.
    Tree(TreeError),
    /// The root chain has no entries.
    NotBootstrapped,
    /// The store's nodes cannot hold a full branch.
    NodeSizeLimitTooSmall { limit: usize, required: usize },
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::RootChain(e) => write!(f, "root chain error: {e}"),
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::NotBootstrapped => write!(f, "root chain is empty"),
            Self::NodeSizeLimitTooSmall { limit, required } => {
                write!(f, "node size limit {limit} is below the {required} bytes a branch needs")
            }
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::RootChain(e) => Some(e),
            Self::Tree(e) => Some(e),
            Self::NotBootstrapped | Self::NodeSizeLimitTooSmall { .. } => None,
        }
    }
}

impl From<StoreError> for DatabaseError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<RootChainError> for DatabaseError {
    fn from(e: RootChainError) -> Self {
        Self::RootChain(e)
    }
}

impl From<TreeError> for DatabaseError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}
