//! Node storage.
//!
//! Nodes are immutable once stored. A transaction reads them through a
//! `NodeStore`, which also owns the transaction's private mutable copies
//! until commit persists them through a `StoreBackend`.
//!
//! # Layers
//!
//! - `addr`: node address classification and its 128-bit encoding
//! - `span` / `buffer`: read-only views and mutable node buffers
//! - `node_store`: the per-transaction workspace
//! - `heap_store` / `file_store`: durable backends
//! - `root_chain`: the append-only history of root addresses
//!
//! # Usage
//!
//! ```ignore
//! use storage::{HeapStore, NodeStore, NodeKind};
//!
//! let mut nodes = NodeStore::new(Arc::new(HeapStore::new()));
//! let leaf = nodes.create_empty_data_buffer(NodeKind::Leaf);
//! nodes.buffer_mut(leaf)?.append(b"hello")?;
//! let stored = nodes.write_all(&[leaf])?;
//! ```

mod addr;
mod buffer;
mod file_store;
mod heap_store;
mod io;
mod node_store;
mod root_chain;
mod span;
pub mod time;

pub use addr::{Addr, InvalidAddr, MAX_SPARSE_SIZE, NodeKind};
pub use buffer::{DataBuffer, DataExtract};
pub use file_store::FileStore;
pub use heap_store::HeapStore;
pub use io::{AllocationHint, DEFAULT_NODE_SIZE_LIMIT, FIRST_STORED_ID, StoreBackend, StoreError};
pub use node_store::NodeStore;
pub use root_chain::{FileRootChain, HeapRootChain, RootChain, RootChainError, RootEntry};
pub use span::{DataSpan, NodeRef, ReadableSpan, SparseSpan};
