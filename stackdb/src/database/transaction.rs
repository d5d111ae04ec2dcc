//! Transactions over a copy-on-write tree.
//!
//! A transaction owns a `TreeStack` on a private `NodeStore`. Nothing it
//! writes is visible to anyone else until `commit` persists the new nodes
//! and appends the new root to the root chain. If another transaction
//! committed first, the append is rejected and the commit fails with a
//! conflict that the caller may retry from a fresh transaction.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::database::data_value::DataValue;
use crate::storage::{Addr, NodeStore, RootChain, RootChainError, StoreError};
use crate::tree::{IntegrityReport, Key, TreeError, TreeStack, key};

/// What a successful commit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The tree was not modified; the root chain is unchanged.
    NoChanges,
    /// A new root was appended to the root chain.
    Committed { root: Addr },
}

/// A single-writer transaction.
pub struct Transaction {
    tree: RefCell<TreeStack>,
    chain: Arc<dyn RootChain>,
}

impl Transaction {
    pub(crate) fn new(nodes: NodeStore, chain: Arc<dyn RootChain>, root: Addr) -> Self {
        debug!(%root, "began transaction");
        Self {
            tree: RefCell::new(TreeStack::new(nodes, root)),
            chain,
        }
    }

    /// Root the transaction started from.
    #[must_use]
    pub fn originating_root_addr(&self) -> Addr {
        self.tree.borrow().originating_root_addr()
    }

    /// Current root of the transaction's private tree.
    #[must_use]
    pub fn root_addr(&self) -> Addr {
        self.tree.borrow().root_addr()
    }

    /// A cursor over the bytes of `key`, positioned at the start.
    pub fn value(&self, key: Key) -> Result<DataValue<'_>, TransactionError> {
        if key::is_sentinel(&key) {
            return Err(TreeError::OutOfRange(format!("{key} is a reserved key")).into());
        }
        Ok(DataValue::new(self, key))
    }

    /// Number of bytes stored under `key`.
    pub fn key_size(&self, key: Key) -> Result<i64, TransactionError> {
        self.with_tree(|tree| tree.key_size(key))
    }

    /// Run `op` with exclusive use of the tree stack.
    ///
    /// Re-entering while another operation holds the stack is reported as
    /// `TreeError::AlreadyLocked`.
    pub(crate) fn with_tree<T>(
        &self,
        op: impl FnOnce(&mut TreeStack) -> Result<T, TreeError>,
    ) -> Result<T, TransactionError> {
        let mut tree = self
            .tree
            .try_borrow_mut()
            .map_err(|_| TransactionError::Tree(TreeError::AlreadyLocked))?;
        Ok(op(&mut tree)?)
    }

    pub fn check_tree_integrity(&self) -> Result<IntegrityReport, TransactionError> {
        self.with_tree(TreeStack::check_tree_integrity)
    }

    pub fn dump_tree_branches(&self) -> Result<String, TransactionError> {
        self.with_tree(TreeStack::dump_tree_branches)
    }

    #[must_use]
    pub fn dump_stack_state(&self) -> String {
        self.tree.borrow().dump_stack_state()
    }

    /// Commit the transaction.
    ///
    /// Writes every in-memory node in one batch, then appends the new root
    /// conditioned on the originating root still being the newest.
    pub fn commit(self) -> Result<CommitOutcome, TransactionError> {
        let mut tree = self.tree.into_inner();
        if tree.is_invalidated() {
            return Err(TreeError::Invalidated.into());
        }
        let originating = tree.originating_root_addr();
        let root = tree.root_addr();
        if root == originating {
            debug!("commit without changes");
            return Ok(CommitOutcome::NoChanges);
        }

        let addrs = tree.get_all_in_memory_addresses()?;
        if addrs.is_empty() {
            return Ok(CommitOutcome::NoChanges);
        }
        let stored = tree.store_mut().write_all(&addrs)?;
        let index = addrs.iter().position(|a| *a == root).ok_or_else(|| {
            TreeError::Corruption(format!("root {root} is not among the written nodes"))
        })?;
        let new_root = stored[index];

        let entry = match self.chain.put_entry(new_root, Some(originating)) {
            Ok(entry) => entry,
            Err(e) => {
                if matches!(e, RootChainError::Conflict { .. }) {
                    warn!(root = %new_root, error = %e, "commit lost to a concurrent transaction");
                }
                return Err(e.into());
            }
        };
        info!(
            root = %new_root,
            previous = %originating,
            nodes = addrs.len(),
            timestamp_ms = entry.timestamp_ms,
            "committed transaction"
        );
        Ok(CommitOutcome::Committed { root: new_root })
    }

    /// Abort the transaction, discarding every private node.
    pub fn abort(self) {
        let mut tree = self.tree.into_inner();
        let discarded = tree.store_mut().buffer_count();
        tree.invalidate();
        debug!(discarded, "aborted transaction");
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during transaction operations.
#[derive(Debug)]
pub enum TransactionError {
    /// Tree error.
    Tree(TreeError),
    /// Node store error.
    Store(StoreError),
    /// Root chain error, including commit conflicts.
    RootChain(RootChainError),
}

impl TransactionError {
    /// True if another transaction committed first. The work can be
    /// retried from a new transaction.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::RootChain(RootChainError::Conflict { .. }))
    }

    /// True for a key or position outside the data.
    #[must_use]
    pub const fn is_out_of_range(&self) -> bool {
        matches!(self, Self::Tree(TreeError::OutOfRange(_)))
    }
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::RootChain(e) => write!(f, "root chain error: {e}"),
        }
    }
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::RootChain(e) => Some(e),
        }
    }
}

impl From<TreeError> for TransactionError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<StoreError> for TransactionError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<RootChainError> for TransactionError {
    fn from(e: RootChainError) -> Self {
        Self::RootChain(e)
    }
}
