//! Heap-backed durable store.
//!
//! Spans live in a hash map for the lifetime of the process. Used for tests
//! and for `Database::in_memory`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::storage::addr::Addr;
use crate::storage::io::{
    AllocationHint, DEFAULT_NODE_SIZE_LIMIT, FIRST_STORED_ID, StoreBackend, StoreError,
    validate_batch,
};
use crate::storage::span::DataSpan;

/// A store that keeps every span on the heap.
#[derive(Debug)]
pub struct HeapStore {
    spans: Mutex<HashMap<Addr, Arc<[u8]>>>,
    next_id: AtomicU64,
    node_size_limit: usize,
}

impl HeapStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_node_size_limit(DEFAULT_NODE_SIZE_LIMIT)
    }

    #[must_use]
    pub fn with_node_size_limit(node_size_limit: usize) -> Self {
        Self {
            spans: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(FIRST_STORED_ID),
            node_size_limit,
        }
    }

    /// Number of spans stored.
    #[must_use]
    pub fn span_count(&self) -> usize {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let spans = self.spans.lock().expect("heap store mutex poisoned");
        spans.len()
    }
}

impl Default for HeapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for HeapStore {
    fn read_span(&self, addr: Addr) -> Result<DataSpan, StoreError> {
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let spans = self.spans.lock().expect("heap store mutex poisoned");
        spans
            .get(&addr)
            .map(|data| DataSpan::new(addr, Arc::clone(data)))
            .ok_or(StoreError::NotFound(addr))
    }

    fn allocate_store_addrs(&self, hints: &[AllocationHint]) -> Result<Vec<Addr>, StoreError> {
        let count = hints.len() as u64;
        let first = self.next_id.fetch_add(count, Ordering::SeqCst);
        Ok(hints
            .iter()
            .zip(first..)
            .map(|(hint, id)| Addr::Stored {
                kind: hint.kind,
                id,
            })
            .collect())
    }

    fn write_spans(&self, spans: &[(Addr, Arc<[u8]>)]) -> Result<(), StoreError> {
        validate_batch(spans, self.node_size_limit)?;
        #[allow(clippy::expect_used)] // Mutex poisoning is unrecoverable
        let mut map = self.spans.lock().expect("heap store mutex poisoned");
        for (addr, data) in spans {
            map.insert(*addr, Arc::clone(data));
        }
        Ok(())
    }

    fn node_data_byte_size_limit(&self) -> usize {
        self.node_size_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::addr::NodeKind;
    use crate::storage::span::ReadableSpan;

    fn hint(kind: NodeKind) -> AllocationHint {
        AllocationHint {
            kind,
            size: 0,
            size_diff: 0,
            origin: None,
            append_only: false,
        }
    }

    #[test]
    fn test_allocation_is_monotonic_and_keeps_kind() {
        let store = HeapStore::new();
        let addrs = store
            .allocate_store_addrs(&[hint(NodeKind::Branch), hint(NodeKind::Leaf)])
            .unwrap();
        assert_eq!(
            addrs,
            vec![
                Addr::Stored {
                    kind: NodeKind::Branch,
                    id: FIRST_STORED_ID
                },
                Addr::Stored {
                    kind: NodeKind::Leaf,
                    id: FIRST_STORED_ID + 1
                },
            ]
        );
        let more = store.allocate_store_addrs(&[hint(NodeKind::Leaf)]).unwrap();
        assert_eq!(
            more[0],
            Addr::Stored {
                kind: NodeKind::Leaf,
                id: FIRST_STORED_ID + 2
            }
        );
    }

    #[test]
    fn test_write_then_read() {
        let store = HeapStore::new();
        let addr = store.allocate_store_addrs(&[hint(NodeKind::Leaf)]).unwrap()[0];
        store
            .write_spans(&[(addr, Arc::from(b"abc".as_slice()))])
            .unwrap();
        let span = store.read_span(addr).unwrap();
        assert_eq!(span.as_bytes(), b"abc");
        assert_eq!(span.addr(), addr);
        assert_eq!(store.span_count(), 1);
    }

    #[test]
    fn test_missing_span() {
        let store = HeapStore::new();
        let addr = Addr::Stored {
            kind: NodeKind::Leaf,
            id: 1,
        };
        assert!(matches!(store.read_span(addr), Err(StoreError::NotFound(a)) if a == addr));
    }
}
