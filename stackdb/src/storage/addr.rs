//! Node addresses.
//!
//! An address names a tree node. In memory it is a tagged enum; the bit
//! layout below is only used when an address is written into (or read out
//! of) node bytes or a durable file:
//!
//! ```text
//! byte 0, bit 0       0 = branch, 1 = leaf
//! byte 0, high nibble 0x7 = in-memory, 0x6 = stored
//! 0x63 0xf0 ...       sparse leaf, low 64 bits = size in bytes
//! low 64 bits         in-memory or stored identifier
//! ```

use std::fmt;

use crate::types::Value128;

/// High 64 bits of an in-memory branch address.
const IN_MEMORY_BRANCH_HIGH: u64 = 0x7000_0000_0000_0000;
/// High 64 bits of an in-memory leaf address.
const IN_MEMORY_LEAF_HIGH: u64 = 0x7100_0000_0000_0000;
/// High 64 bits of a stored branch address.
const STORED_BRANCH_HIGH: u64 = 0x6000_0000_0000_0000;
/// High 64 bits of a stored leaf address.
const STORED_LEAF_HIGH: u64 = 0x6100_0000_0000_0000;
/// High 64 bits of a sparse leaf address.
const SPARSE_LEAF_HIGH: u64 = 0x63f0_0000_0000_0000;

/// Largest size a sparse leaf may claim.
pub const MAX_SPARSE_SIZE: u64 = 1 << 50;

/// Whether a node is a branch or a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Branch,
    Leaf,
}

/// A node address.
///
/// # Invariants
///
/// - `Sparse { size }` always has `size <= MAX_SPARSE_SIZE`.
/// - A sparse address is always a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addr {
    /// A node that only exists in a transaction's private workspace.
    InMemory { kind: NodeKind, id: u64 },
    /// A node that was durably written to a store.
    Stored { kind: NodeKind, id: u64 },
    /// A virtual leaf of `size` zero bytes with no backing storage.
    Sparse { size: u64 },
}

/// Error returned when a 128-bit value is not a valid address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAddr(pub Value128);

impl fmt::Display for InvalidAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid address encoding: {}", self.0)
    }
}

impl std::error::Error for InvalidAddr {}

impl Addr {
    /// The node kind this address points at.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::InMemory { kind, .. } | Self::Stored { kind, .. } => *kind,
            Self::Sparse { .. } => NodeKind::Leaf,
        }
    }

    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(self.kind(), NodeKind::Branch)
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self.kind(), NodeKind::Leaf)
    }

    #[must_use]
    pub const fn is_in_memory(&self) -> bool {
        matches!(self, Self::InMemory { .. })
    }

    /// True for every store-resident address, sparse leaves included.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Stored { .. } | Self::Sparse { .. })
    }

    #[must_use]
    pub const fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse { .. })
    }

    /// True if the node behind this address has stored bytes that can be
    /// copied into a mutable in-memory buffer.
    #[must_use]
    pub const fn is_convertible(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }

    /// Encode as a 128-bit value.
    #[must_use]
    pub fn to_value(&self) -> Value128 {
        match *self {
            Self::InMemory { kind: NodeKind::Branch, id } => Value128::from_parts(IN_MEMORY_BRANCH_HIGH, id),
            Self::InMemory { kind: NodeKind::Leaf, id } => Value128::from_parts(IN_MEMORY_LEAF_HIGH, id),
            Self::Stored { kind: NodeKind::Branch, id } => Value128::from_parts(STORED_BRANCH_HIGH, id),
            Self::Stored { kind: NodeKind::Leaf, id } => Value128::from_parts(STORED_LEAF_HIGH, id),
            Self::Sparse { size } => Value128::from_parts(SPARSE_LEAF_HIGH, size),
        }
    }

    /// Decode a 128-bit value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddr` if the high 64 bits do not match one of the
    /// reserved patterns, or a sparse size exceeds `MAX_SPARSE_SIZE`.
    pub fn from_value(value: Value128) -> Result<Self, InvalidAddr> {
        let low = value.low();
        match value.high() {
            IN_MEMORY_BRANCH_HIGH => Ok(Self::InMemory { kind: NodeKind::Branch, id: low }),
            IN_MEMORY_LEAF_HIGH => Ok(Self::InMemory { kind: NodeKind::Leaf, id: low }),
            STORED_BRANCH_HIGH => Ok(Self::Stored { kind: NodeKind::Branch, id: low }),
            STORED_LEAF_HIGH => Ok(Self::Stored { kind: NodeKind::Leaf, id: low }),
            SPARSE_LEAF_HIGH if low <= MAX_SPARSE_SIZE => Ok(Self::Sparse { size: low }),
            _ => Err(InvalidAddr(value)),
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_bits() {
        let branch = Addr::InMemory { kind: NodeKind::Branch, id: 1 };
        let value = branch.to_value();
        assert_eq!(value.byte_at(0) & 0x01, 0);
        assert_eq!(value.byte_at(0) & 0xf0, 0x70);

        let leaf = Addr::Stored { kind: NodeKind::Leaf, id: 0x0cc50 };
        let value = leaf.to_value();
        assert_eq!(value.byte_at(0) & 0x01, 1);
        assert_eq!(value.byte_at(0) & 0xf0, 0x60);
        // Convertible store addresses never carry the special bit.
        assert_eq!(value.byte_at(0) & 0x02, 0);
    }

    #[test]
    fn test_sparse_encoding() {
        let sparse = Addr::Sparse { size: 1 };
        let value = sparse.to_value();
        assert_eq!(value.byte_at(0), 0x63);
        assert_eq!(value.byte_at(1), 0xf0);
        assert_eq!(value.low(), 1);
        assert!(sparse.is_leaf());
        assert!(sparse.is_store());
        assert!(!sparse.is_convertible());
        assert_eq!(Addr::from_value(value).unwrap(), sparse);
    }

    #[test]
    fn test_sparse_size_limit() {
        let largest = Value128::from_parts(SPARSE_LEAF_HIGH, MAX_SPARSE_SIZE);
        assert_eq!(Addr::from_value(largest).unwrap(), Addr::Sparse { size: MAX_SPARSE_SIZE });
        let too_big = Value128::from_parts(SPARSE_LEAF_HIGH, MAX_SPARSE_SIZE + 1);
        assert!(Addr::from_value(too_big).is_err());
    }

    #[test]
    fn test_decode_all_kinds() {
        for addr in [
            Addr::InMemory { kind: NodeKind::Branch, id: 7 },
            Addr::InMemory { kind: NodeKind::Leaf, id: 8 },
            Addr::Stored { kind: NodeKind::Branch, id: 9 },
            Addr::Stored { kind: NodeKind::Leaf, id: 10 },
        ] {
            assert_eq!(Addr::from_value(addr.to_value()).unwrap(), addr);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_pattern() {
        assert_eq!(Addr::from_value(Value128::ZERO), Err(InvalidAddr(Value128::ZERO)));
        assert!(Addr::from_value(Value128::MAX).is_err());
        assert!(Addr::from_value(Value128::from_parts(0x7200_0000_0000_0000, 1)).is_err());
    }
}
