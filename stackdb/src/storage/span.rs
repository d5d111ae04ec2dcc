//! Read-only node views.
//!
//! Every node the tree reads is seen through `ReadableSpan`: a stored span,
//! a synthetic all-zero sparse span, or a transaction's mutable buffer.

use std::sync::Arc;

use crate::storage::addr::Addr;
use crate::storage::buffer::DataBuffer;
use crate::storage::io::StoreError;
use crate::types::{VALUE128_SIZE, Value128};

/// Random access reads over the bytes of one node.
///
/// All multi-byte integers are big-endian.
pub trait ReadableSpan {
    /// Address of the node this span shows.
    fn addr(&self) -> Addr;

    /// Number of bytes in the node.
    fn size(&self) -> usize;

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    fn read_into(&self, offset: usize, dst: &mut [u8]) -> Result<(), StoreError>;

    fn read_u8(&self, offset: usize) -> Result<u8, StoreError> {
        let mut b = [0u8; 1];
        self.read_into(offset, &mut b)?;
        Ok(b[0])
    }

    fn read_i64(&self, offset: usize) -> Result<i64, StoreError> {
        let mut b = [0u8; 8];
        self.read_into(offset, &mut b)?;
        Ok(i64::from_be_bytes(b))
    }

    fn read_u64(&self, offset: usize) -> Result<u64, StoreError> {
        let mut b = [0u8; 8];
        self.read_into(offset, &mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    fn read_value128(&self, offset: usize) -> Result<Value128, StoreError> {
        let mut b = [0u8; VALUE128_SIZE];
        self.read_into(offset, &mut b)?;
        Ok(Value128(b))
    }

    fn read_addr(&self, offset: usize) -> Result<Addr, StoreError> {
        Ok(Addr::from_value(self.read_value128(offset)?)?)
    }
}

/// Bounds check shared by the span implementations.
pub(crate) const fn check_range(offset: usize, len: usize, size: usize) -> Result<(), StoreError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StoreError::OutOfBounds { offset, len, size }),
    }
}

/// An immutable span of stored node bytes.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Debug, Clone)]
pub struct DataSpan {
    addr: Addr,
    data: Arc<[u8]>,
}

impl DataSpan {
    #[must_use]
    pub const fn new(addr: Addr, data: Arc<[u8]>) -> Self {
        Self { addr, data }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ReadableSpan for DataSpan {
    fn addr(&self) -> Addr {
        self.addr
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn read_into(&self, offset: usize, dst: &mut [u8]) -> Result<(), StoreError> {
        check_range(offset, dst.len(), self.data.len())?;
        dst.copy_from_slice(&self.data[offset..offset + dst.len()]);
        Ok(())
    }
}

/// A synthetic view of a sparse leaf: `size` zero bytes, no I/O.
#[derive(Debug, Clone, Copy)]
pub struct SparseSpan {
    size: u64,
}

impl SparseSpan {
    #[must_use]
    pub const fn new(size: u64) -> Self {
        Self { size }
    }
}

impl ReadableSpan for SparseSpan {
    fn addr(&self) -> Addr {
        Addr::Sparse { size: self.size }
    }

    #[allow(clippy::cast_possible_truncation)] // Sparse sizes are bounded by MAX_SPARSE_SIZE
    fn size(&self) -> usize {
        self.size as usize
    }

    fn read_into(&self, offset: usize, dst: &mut [u8]) -> Result<(), StoreError> {
        check_range(offset, dst.len(), self.size())?;
        dst.fill(0);
        Ok(())
    }
}

/// Whatever `NodeStore::get` resolved an address to.
#[derive(Debug)]
pub enum NodeRef<'a> {
    Span(DataSpan),
    Sparse(SparseSpan),
    Buffer(&'a DataBuffer),
}

impl ReadableSpan for NodeRef<'_> {
    fn addr(&self) -> Addr {
        match self {
            Self::Span(s) => s.addr(),
            Self::Sparse(s) => s.addr(),
            Self::Buffer(b) => b.addr(),
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::Span(s) => s.size(),
            Self::Sparse(s) => s.size(),
            Self::Buffer(b) => b.size(),
        }
    }

    fn read_into(&self, offset: usize, dst: &mut [u8]) -> Result<(), StoreError> {
        match self {
            Self::Span(s) => s.read_into(offset, dst),
            Self::Sparse(s) => s.read_into(offset, dst),
            Self::Buffer(b) => b.read_into(offset, dst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::addr::NodeKind;

    #[test]
    fn test_data_span_typed_reads() {
        let mut bytes = vec![0u8; 40];
        bytes[16..24].copy_from_slice(&1234i64.to_be_bytes());
        bytes[24] = 0xab;
        let span = DataSpan::new(
            Addr::Stored {
                kind: NodeKind::Branch,
                id: 1,
            },
            bytes.into(),
        );

        assert_eq!(span.size(), 40);
        assert_eq!(span.read_i64(16).unwrap(), 1234);
        assert_eq!(span.read_u8(24).unwrap(), 0xab);
        assert_eq!(span.read_value128(24).unwrap().byte_at(0), 0xab);
    }

    #[test]
    fn test_data_span_out_of_bounds() {
        let span = DataSpan::new(
            Addr::Stored {
                kind: NodeKind::Leaf,
                id: 1,
            },
            vec![1u8, 2, 3].into(),
        );
        assert!(matches!(
            span.read_i64(0),
            Err(StoreError::OutOfBounds { offset: 0, len: 8, size: 3 })
        ));
    }

    #[test]
    fn test_sparse_span_reads_zeros() {
        let span = SparseSpan::new(100);
        let mut dst = [0xffu8; 10];
        span.read_into(90, &mut dst).unwrap();
        assert_eq!(dst, [0u8; 10]);
        assert!(span.read_into(95, &mut dst).is_err());
        assert_eq!(span.addr(), Addr::Sparse { size: 100 });
    }

    #[test]
    fn test_read_addr_rejects_garbage() {
        let span = DataSpan::new(
            Addr::Stored {
                kind: NodeKind::Branch,
                id: 1,
            },
            vec![0u8; 16].into(),
        );
        assert!(matches!(span.read_addr(0), Err(StoreError::InvalidAddr(_))));
    }
}
