//! Mutable in-memory node buffers.
//!
//! A `DataBuffer` is a transaction-private copy of a node. It remembers the
//! offsets at which addresses were written (its "address points") so that,
//! at commit, every in-memory address embedded in a branch can be rewritten
//! to the stored address its child received.
//!
//! # Invariants
//!
//! - `data.len() <= limit`
//! - Address points never overlap and each one lies fully inside `data`.
//! - No raw write, shift or truncation may tear an address point.

use std::collections::{BTreeSet, HashMap};

use crate::storage::addr::Addr;
use crate::storage::io::{AllocationHint, StoreError};
use crate::storage::span::{DataSpan, ReadableSpan, check_range};
use crate::types::{VALUE128_SIZE, Value128};

/// A byte range cut out of a buffer together with the address points that
/// fell inside it (relative to the start of the range).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataExtract {
    pub bytes: Vec<u8>,
    pub addr_points: Vec<usize>,
}

/// A mutable node buffer.
#[derive(Debug, Clone)]
pub struct DataBuffer {
    addr: Addr,
    data: Vec<u8>,
    limit: usize,
    addr_points: BTreeSet<usize>,
    /// Stored node this buffer was materialized from.
    origin: Option<Addr>,
    original_size: usize,
    append_only: bool,
}

impl DataBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new(addr: Addr, limit: usize) -> Self {
        Self {
            addr,
            data: Vec::new(),
            limit,
            addr_points: BTreeSet::new(),
            origin: None,
            original_size: 0,
            append_only: true,
        }
    }

    /// Create a buffer holding a copy of a stored span.
    ///
    /// `addr_points` are the offsets of addresses already embedded in the
    /// span's bytes.
    pub fn from_span(
        addr: Addr,
        span: &DataSpan,
        limit: usize,
        addr_points: impl IntoIterator<Item = usize>,
    ) -> Result<Self, StoreError> {
        let data = span.as_bytes().to_vec();
        if data.len() > limit {
            return Err(StoreError::LimitExceeded {
                requested: data.len(),
                limit,
            });
        }
        let original_size = data.len();
        let mut buffer = Self {
            addr,
            data,
            limit,
            addr_points: BTreeSet::new(),
            origin: Some(span.addr()),
            original_size,
            append_only: true,
        };
        for point in addr_points {
            check_range(point, VALUE128_SIZE, buffer.data.len())?;
            buffer.ensure_no_overlap(point, VALUE128_SIZE)?;
            buffer.addr_points.insert(point);
        }
        Ok(buffer)
    }

    /// Create a zero-filled buffer standing in for a sparse leaf.
    pub fn zeroed(addr: Addr, size: usize, limit: usize, origin: Addr) -> Result<Self, StoreError> {
        if size > limit {
            return Err(StoreError::LimitExceeded {
                requested: size,
                limit,
            });
        }
        Ok(Self {
            addr,
            data: vec![0u8; size],
            limit,
            addr_points: BTreeSet::new(),
            origin: Some(origin),
            original_size: size,
            append_only: true,
        })
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Offsets of embedded addresses, ascending.
    pub fn addr_points(&self) -> impl Iterator<Item = usize> + '_ {
        self.addr_points.iter().copied()
    }

    /// Fails if `[offset, offset + len)` partially or fully covers an
    /// address point.
    fn ensure_no_overlap(&self, offset: usize, len: usize) -> Result<(), StoreError> {
        let end = offset + len;
        let start = offset.saturating_sub(VALUE128_SIZE - 1);
        if self.addr_points.range(start..end).next().is_some() {
            return Err(StoreError::AddrOverlap { offset });
        }
        Ok(())
    }

    fn note_write(&mut self, offset: usize) {
        if offset < self.original_size {
            self.append_only = false;
        }
    }

    /// Write raw bytes at `offset`.
    ///
    /// The write may extend the buffer (`offset <= size`), up to the limit.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        self.write_raw(offset, bytes, false)
    }

    fn write_raw(&mut self, offset: usize, bytes: &[u8], is_addr: bool) -> Result<(), StoreError> {
        if offset > self.data.len() {
            return Err(StoreError::OutOfBounds {
                offset,
                len: bytes.len(),
                size: self.data.len(),
            });
        }
        let end = offset + bytes.len();
        if end > self.limit {
            return Err(StoreError::LimitExceeded {
                requested: end,
                limit: self.limit,
            });
        }
        if is_addr {
            // Replacing the address at the same point is fine; anything
            // else overlapping is not.
            let existing = self.addr_points.remove(&offset);
            if let Err(e) = self.ensure_no_overlap(offset, bytes.len()) {
                if existing {
                    self.addr_points.insert(offset);
                }
                return Err(e);
            }
        } else {
            self.ensure_no_overlap(offset, bytes.len())?;
        }

        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(bytes);
        self.note_write(offset);
        Ok(())
    }

    /// Append raw bytes to the end of the buffer.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.write_bytes(self.data.len(), bytes)
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) -> Result<(), StoreError> {
        self.write_bytes(offset, &[value])
    }

    pub fn write_i64(&mut self, offset: usize, value: i64) -> Result<(), StoreError> {
        self.write_bytes(offset, &value.to_be_bytes())
    }

    pub fn write_value128(&mut self, offset: usize, value: Value128) -> Result<(), StoreError> {
        self.write_bytes(offset, value.as_bytes())
    }

    /// Write an address and record it as an address point.
    pub fn write_addr(&mut self, offset: usize, addr: Addr) -> Result<(), StoreError> {
        self.write_raw(offset, addr.to_value().as_bytes(), true)?;
        self.addr_points.insert(offset);
        Ok(())
    }

    /// Insert (`amount > 0`) or remove (`amount < 0`) bytes at `offset`.
    ///
    /// Inserted bytes are zero. Address points at or after `offset` move
    /// with the data. Removing bytes that contain address points drops
    /// those points.
    pub fn shift(&mut self, amount: isize, offset: usize) -> Result<(), StoreError> {
        if offset > self.data.len() {
            return Err(StoreError::OutOfBounds {
                offset,
                len: amount.unsigned_abs(),
                size: self.data.len(),
            });
        }
        // Splitting an address in two is never allowed.
        let start = offset.saturating_sub(VALUE128_SIZE - 1);
        if self.addr_points.range(start..offset).next().is_some() {
            return Err(StoreError::AddrOverlap { offset });
        }

        let moved: Vec<usize> = self.addr_points.range(offset..).copied().collect();
        if amount >= 0 {
            let amount = amount.unsigned_abs();
            let new_size = self.data.len() + amount;
            if new_size > self.limit {
                return Err(StoreError::LimitExceeded {
                    requested: new_size,
                    limit: self.limit,
                });
            }
            self.data.splice(offset..offset, std::iter::repeat_n(0u8, amount));
            for p in &moved {
                self.addr_points.remove(p);
            }
            for p in moved {
                self.addr_points.insert(p + amount);
            }
        } else {
            let amount = amount.unsigned_abs();
            check_range(offset, amount, self.data.len())?;
            let removed_end = offset + amount;
            // A point straddling the end of the removed range would be torn.
            if moved.iter().any(|&p| p < removed_end && p + VALUE128_SIZE > removed_end) {
                return Err(StoreError::AddrOverlap { offset: removed_end });
            }
            self.data.drain(offset..removed_end);
            for p in &moved {
                self.addr_points.remove(p);
            }
            for p in moved.into_iter().filter(|&p| p >= removed_end) {
                self.addr_points.insert(p - amount);
            }
        }
        self.note_write(offset);
        Ok(())
    }

    /// Grow (zero filled) or truncate the buffer to `size` bytes.
    pub fn set_size(&mut self, size: usize) -> Result<(), StoreError> {
        let current = self.data.len();
        if size >= current {
            self.shift(isize::try_from(size - current).map_err(|_| StoreError::LimitExceeded {
                requested: size,
                limit: self.limit,
            })?, current)
        } else {
            let amount = isize::try_from(current - size).map_err(|_| StoreError::OutOfBounds {
                offset: size,
                len: current - size,
                size: current,
            })?;
            self.shift(-amount, size)
        }
    }

    /// Copy `len` bytes at `offset`, with the address points inside them.
    pub fn extract(&self, offset: usize, len: usize) -> Result<DataExtract, StoreError> {
        check_range(offset, len, self.data.len())?;
        let end = offset + len;
        let start = offset.saturating_sub(VALUE128_SIZE - 1);
        // Points that start before the range but reach into it.
        if self.addr_points.range(start..offset).next().is_some() {
            return Err(StoreError::AddrOverlap { offset });
        }
        let mut addr_points = Vec::new();
        for p in self.addr_points.range(offset..end) {
            if p + VALUE128_SIZE > end {
                return Err(StoreError::AddrOverlap { offset: *p });
            }
            addr_points.push(p - offset);
        }
        Ok(DataExtract {
            bytes: self.data[offset..end].to_vec(),
            addr_points,
        })
    }

    /// Write an extract at `offset`, restoring its address points.
    pub fn write_extract(&mut self, offset: usize, extract: &DataExtract) -> Result<(), StoreError> {
        self.write_bytes(offset, &extract.bytes)?;
        for p in &extract.addr_points {
            self.addr_points.insert(offset + p);
        }
        Ok(())
    }

    /// Replace every embedded address found in `mapping`.
    ///
    /// Returns the number of substituted addresses.
    pub fn substitute_addrs(&mut self, mapping: &HashMap<Addr, Addr>) -> Result<usize, StoreError> {
        let points: Vec<usize> = self.addr_points.iter().copied().collect();
        let mut count = 0;
        for p in points {
            let current = self.read_addr(p)?;
            if let Some(replacement) = mapping.get(&current) {
                self.data[p..p + VALUE128_SIZE].copy_from_slice(replacement.to_value().as_bytes());
                count += 1;
            }
        }
        Ok(count)
    }

    /// Fail if any embedded address still refers to an in-memory node.
    pub fn validate_addrs(&self) -> Result<(), StoreError> {
        for p in &self.addr_points {
            let addr = self.read_addr(*p)?;
            if !addr.is_store() {
                return Err(StoreError::UnresolvedAddr(addr));
            }
        }
        Ok(())
    }

    /// Describe this buffer to the allocator.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)] // Node sizes are bounded by the node size limit
    pub fn modification_hint(&self) -> AllocationHint {
        AllocationHint {
            kind: self.addr.kind(),
            size: self.data.len(),
            size_diff: self.data.len() as i64 - self.original_size as i64,
            origin: self.origin,
            append_only: self.origin.is_some() && self.append_only,
        }
    }

    /// Consume the buffer, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl ReadableSpan for DataBuffer {
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
