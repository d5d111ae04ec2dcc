//! Per-transaction node workspace.
//!
//! A `NodeStore` sits between the tree and a shared `StoreBackend`. Stored
//! spans are read through it (and cached), and every node the transaction
//! mutates lives here as a private `DataBuffer` under an in-memory address
//! until `write_all` persists it.
//!
//! # Invariants
//!
//! - In-memory identifiers are unique per kind within one `NodeStore`.
//! - A buffer is never visible to any other transaction.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::storage::addr::{Addr, NodeKind};
use crate::storage::buffer::DataBuffer;
use crate::storage::io::{StoreBackend, StoreError};
use crate::storage::span::{DataSpan, NodeRef, ReadableSpan, SparseSpan};

/// A transaction's view of the store plus its mutable buffers.
pub struct NodeStore {
    backend: Arc<dyn StoreBackend>,
    buffers: HashMap<Addr, DataBuffer>,
    span_cache: HashMap<Addr, DataSpan>,
    next_branch_id: u64,
    next_leaf_id: u64,
}

impl NodeStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            buffers: HashMap::new(),
            span_cache: HashMap::new(),
            next_branch_id: 0,
            next_leaf_id: 0,
        }
    }

    /// Upper bound on the byte size of any node.
    #[must_use]
    pub fn node_data_byte_size_limit(&self) -> usize {
        self.backend.node_data_byte_size_limit()
    }

    /// Resolve an address to a readable view.
    ///
    /// Sparse leaves resolve to a synthetic zero span without touching the
    /// backend.
    pub fn get(&mut self, addr: Addr) -> Result<NodeRef<'_>, StoreError> {
        match addr {
            Addr::Sparse { size } => Ok(NodeRef::Sparse(SparseSpan::new(size))),
            Addr::InMemory { .. } => self
                .buffers
                .get(&addr)
                .map(NodeRef::Buffer)
                .ok_or(StoreError::NotFound(addr)),
            Addr::Stored { .. } => Ok(NodeRef::Span(self.get_span(addr)?)),
        }
    }

    /// Read a stored span, going to the backend at most once per address.
    pub fn get_span(&mut self, addr: Addr) -> Result<DataSpan, StoreError> {
        if let Some(span) = self.span_cache.get(&addr) {
            return Ok(span.clone());
        }
        if !addr.is_convertible() {
            return Err(StoreError::NotConvertible(addr));
        }
        let span = self.backend.read_span(addr)?;
        self.span_cache.insert(addr, span.clone());
        Ok(span)
    }

    fn next_in_memory_addr(&mut self, kind: NodeKind) -> Addr {
        let counter = match kind {
            NodeKind::Branch => &mut self.next_branch_id,
            NodeKind::Leaf => &mut self.next_leaf_id,
        };
        let id = *counter;
        *counter += 1;
        Addr::InMemory { kind, id }
    }

    /// Create a fresh, empty buffer and return its address.
    pub fn create_empty_data_buffer(&mut self, kind: NodeKind) -> Addr {
        let addr = self.next_in_memory_addr(kind);
        let limit = self.node_data_byte_size_limit();
        self.buffers.insert(addr, DataBuffer::new(addr, limit));
        addr
    }

    /// True if the address names stored bytes that can be copied into a
    /// buffer.
    #[must_use]
    pub const fn can_convert_to_buffer(addr: Addr) -> bool {
        addr.is_convertible()
    }

    /// Copy a stored span into a new mutable buffer.
    ///
    /// `addr_points` are the offsets of addresses embedded in the span.
    pub fn convert_span_to_buffer(
        &mut self,
        span: &DataSpan,
        addr_points: impl IntoIterator<Item = usize>,
    ) -> Result<Addr, StoreError> {
        let origin = span.addr();
        if !Self::can_convert_to_buffer(origin) {
            return Err(StoreError::NotConvertible(origin));
        }
        let addr = self.next_in_memory_addr(origin.kind());
        let limit = self.node_data_byte_size_limit();
        let buffer = DataBuffer::from_span(addr, span, limit, addr_points)?;
        self.buffers.insert(addr, buffer);
        Ok(addr)
    }

    /// Replace a sparse leaf with a zero-filled buffer of the same size.
    pub fn materialize_sparse(&mut self, sparse: Addr) -> Result<Addr, StoreError> {
        let Addr::Sparse { size } = sparse else {
            return Err(StoreError::NotConvertible(sparse));
        };
        let limit = self.node_data_byte_size_limit();
        let size = usize::try_from(size).map_err(|_| StoreError::LimitExceeded {
            requested: usize::MAX,
            limit,
        })?;
        let addr = self.next_in_memory_addr(NodeKind::Leaf);
        let buffer = DataBuffer::zeroed(addr, size, limit, sparse)?;
        self.buffers.insert(addr, buffer);
        Ok(addr)
    }

    /// Mutable access to an in-memory buffer.
    pub fn buffer_mut(&mut self, addr: Addr) -> Result<&mut DataBuffer, StoreError> {
        self.buffers
            .get_mut(&addr)
            .ok_or(StoreError::NotInMemory(addr))
    }

    /// Buffers for the given addresses that are still resident, in order.
    #[must_use]
    pub fn get_all_data_buffers(&self, addrs: &[Addr]) -> Vec<&DataBuffer> {
        addrs.iter().filter_map(|a| self.buffers.get(a)).collect()
    }

    /// Number of resident buffers.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Persist the buffers at `addrs` as one atomic batch.
    ///
    /// Every in-memory address embedded in the batch is replaced by the
    /// stored address allocated for it. Returns the stored addresses,
    /// positionally matching `addrs`. Written buffers are removed from the
    /// workspace.
    pub fn write_all(&mut self, addrs: &[Addr]) -> Result<Vec<Addr>, StoreError> {
        let mut hints = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let buffer = self.buffers.get(addr).ok_or(StoreError::NotInMemory(*addr))?;
            hints.push(buffer.modification_hint());
        }

        let stored = self.backend.allocate_store_addrs(&hints)?;
        if stored.len() != addrs.len() {
            return Err(StoreError::Corruption(format!(
                "allocated {} addresses for {} buffers",
                stored.len(),
                addrs.len()
            )));
        }
        let mapping: HashMap<Addr, Addr> = addrs.iter().copied().zip(stored.iter().copied()).collect();

        // Substitute on copies so a failed write leaves the workspace intact.
        let mut spans = Vec::with_capacity(addrs.len());
        let mut substituted = 0;
        for (addr, out) in addrs.iter().zip(&stored) {
            let mut staged = self
                .buffers
                .get(addr)
                .ok_or(StoreError::NotInMemory(*addr))?
                .clone();
            substituted += staged.substitute_addrs(&mapping)?;
            staged.validate_addrs()?;
            spans.push((*out, Arc::<[u8]>::from(staged.into_bytes())));
        }

        self.backend.write_spans(&spans)?;

        let append_only = hints.iter().filter(|h| h.append_only).count();
        debug!(
            nodes = addrs.len(),
            substituted, append_only, "wrote node batch"
        );

        for (addr, (out, data)) in addrs.iter().zip(spans) {
            self.buffers.remove(addr);
            self.span_cache.insert(out, DataSpan::new(out, data));
        }
        Ok(stored)
    }

    /// Drop every resident buffer.
    pub fn discard(&mut self) {
        self.buffers.clear();
    }
}

impl std::fmt::Debug for NodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStore")
            .field("buffers", &self.buffers.len())
            .field("cached_spans", &self.span_cache.len())
            .finish_non_exhaustive()
    }
}
