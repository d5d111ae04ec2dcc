//! Durable store abstraction.
//!
//! This module provides a `StoreBackend` trait that abstracts over the place
//! immutable node spans are persisted, allowing the engine to use a single
//! append-only file in production and a heap map in tests.
//!
//! # Design
//!
//! The trait is a minimal contract:
//! - Read an immutable span by its stored address
//! - Allocate stored addresses for a batch of new nodes
//! - Persist a batch of spans atomically
//!
//! All mutation happens in a transaction's `NodeStore` workspace; a backend
//! never sees an in-memory address.

use std::sync::Arc;

use crate::storage::addr::{Addr, InvalidAddr, NodeKind};
use crate::storage::span::DataSpan;

/// First identifier handed out by a fresh store.
pub const FIRST_STORED_ID: u64 = 0x0cc50;

/// Default upper bound on the byte size of a single node.
pub const DEFAULT_NODE_SIZE_LIMIT: usize = 8192;

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error.
    Io(std::io::Error),
    /// No node is stored at the address.
    NotFound(Addr),
    /// A 128-bit value inside node data is not an address.
    InvalidAddr(InvalidAddr),
    /// A read or write falls outside the node.
    OutOfBounds { offset: usize, len: usize, size: usize },
    /// A buffer would grow beyond the node size limit.
    LimitExceeded { requested: usize, limit: usize },
    /// A write or shift would tear an embedded address.
    AddrOverlap { offset: usize },
    /// The address is not a mutable buffer in this workspace.
    NotInMemory(Addr),
    /// The address has no stored bytes to copy.
    NotConvertible(Addr),
    /// An embedded in-memory address has no stored counterpart in the batch.
    UnresolvedAddr(Addr),
    /// Corruption detected.
    Corruption(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::NotFound(addr) => write!(f, "no node stored at {addr}"),
            Self::InvalidAddr(e) => write!(f, "{e}"),
            Self::OutOfBounds { offset, len, size } => write!(
                f,
                "access of {len} bytes at offset {offset} out of bounds (size: {size})"
            ),
            Self::LimitExceeded { requested, limit } => {
                write!(f, "node size {requested} exceeds limit {limit}")
            }
            Self::AddrOverlap { offset } => {
                write!(f, "operation at offset {offset} overlaps an embedded address")
            }
            Self::NotInMemory(addr) => write!(f, "{addr} is not an in-memory buffer"),
            Self::NotConvertible(addr) => write!(f, "{addr} cannot be converted to a buffer"),
            Self::UnresolvedAddr(addr) => {
                write!(f, "in-memory address {addr} was not written in the same batch")
            }
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidAddr(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<InvalidAddr> for StoreError {
    fn from(e: InvalidAddr) -> Self {
        Self::InvalidAddr(e)
    }
}

/// What the store is told about a node it is about to allocate.
///
/// Backends may use these hints to place data; none of them affect the
/// identity of the allocated address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationHint {
    pub kind: NodeKind,
    /// Final byte size of the node.
    pub size: usize,
    /// Size change relative to the stored node it was copied from.
    pub size_diff: i64,
    /// Stored node this buffer was copied from, if any.
    pub origin: Option<Addr>,
    /// True if the only change relative to `origin` is appended bytes.
    pub append_only: bool,
}

/// Abstraction over durable node storage.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_span` returns exactly the bytes passed to `write_spans`
/// - `write_spans` is atomic: after a crash either every span of the batch
///   is readable or none is
/// - `allocate_store_addrs` never returns the same address twice
pub trait StoreBackend: Send + Sync {
    /// Read the immutable span stored at `addr`.
    fn read_span(&self, addr: Addr) -> Result<DataSpan, StoreError>;

    /// Allocate one stored address per hint, positionally.
    fn allocate_store_addrs(&self, hints: &[AllocationHint]) -> Result<Vec<Addr>, StoreError>;

    /// Durably persist a batch of spans.
    fn write_spans(&self, spans: &[(Addr, Arc<[u8]>)]) -> Result<(), StoreError>;

    /// Upper bound on the byte size of any single node.
    fn node_data_byte_size_limit(&self) -> usize;
}

/// Validate that every address in a batch about to be persisted is a
/// convertible stored address.
pub fn validate_batch(spans: &[(Addr, Arc<[u8]>)], limit: usize) -> Result<(), StoreError> {
    for (addr, data) in spans {
        if !addr.is_convertible() {
            return Err(StoreError::NotConvertible(*addr));
        }
        if data.len() > limit {
            return Err(StoreError::LimitExceeded {
                requested: data.len(),
                limit,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::OutOfBounds {
            offset: 10,
            len: 4,
            size: 12,
        };
        assert_eq!(
            err.to_string(),
            "access of 4 bytes at offset 10 out of bounds (size: 12)"
        );
    }

    #[test]
    fn test_validate_batch_rejects_in_memory() {
        let addr = Addr::InMemory {
            kind: NodeKind::Leaf,
            id: 1,
        };
        let spans = vec![(addr, Arc::<[u8]>::from(vec![1u8, 2, 3]))];
        assert!(matches!(
            validate_batch(&spans, 16),
            Err(StoreError::NotConvertible(a)) if a == addr
        ));
    }

    #[test]
    fn test_validate_batch_rejects_oversize() {
        let addr = Addr::Stored {
            kind: NodeKind::Leaf,
            id: FIRST_STORED_ID,
        };
        let spans = vec![(addr, Arc::<[u8]>::from(vec![0u8; 17]))];
        assert!(matches!(
            validate_batch(&spans, 16),
            Err(StoreError::LimitExceeded { requested: 17, limit: 16 })
        ));
    }
}
