//! Branch node layout.
//!
//! A branch is a packed array of child records:
//!
//! ```text
//! +-----------+-----------+-----------+-----------+-----+-----------+-----------+
//! | addr (16) | size (8)  | key (16)  | addr (16) | ... | addr (16) | size (8)  |
//! +-----------+-----------+-----------+-----------+-----+-----------+-----------+
//!  `--------- record 0 ---------------'                   `--- last record ----'
//! ```
//!
//! `size` is the total leaf byte count under the child (signed, big-endian).
//! `key` is the separator: the right bound of the child's key range. The last
//! record has no key; its right bound is inherited from the parent.
//!
//! A child at index `i` covers keys `(left, right]`, where `left` is the
//! separator of record `i - 1` (or the branch's own left bound) and `right`
//! is its own separator (or the branch's right bound).

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use crate::storage::{Addr, DataBuffer, ReadableSpan, StoreError};
use crate::tree::key::Key;
use crate::tree::tree_stack::TreeError;

/// Bytes in a full child record.
pub const RECORD_SIZE: usize = 40;
/// Offset of the size field within a record.
pub const SIZE_OFFSET: usize = 16;
/// Offset of the separator key within a record.
pub const KEY_OFFSET: usize = 24;
/// Bytes in the last record, which carries no key.
pub const LAST_RECORD_SIZE: usize = KEY_OFFSET;

/// A branch never holds more children than this.
pub const MAX_BRANCH_CHILDREN: usize = 19;
/// Target lower bound on children per branch.
pub const MIN_BRANCH_CHILDREN: usize = 7;

/// Largest byte size a branch can reach.
pub const MAX_BRANCH_BYTES: usize = MAX_BRANCH_CHILDREN * RECORD_SIZE - (RECORD_SIZE - LAST_RECORD_SIZE);

/// One decoded child record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRecord {
    pub addr: Addr,
    pub size: i64,
    /// `None` for the last record.
    pub key: Option<Key>,
}

/// A branch that was split in two, ready to be recorded in its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitRecord {
    pub left: Addr,
    pub left_size: i64,
    pub key: Key,
    pub right: Addr,
    pub right_size: i64,
}

/// Byte offset of record `index`.
#[must_use]
pub const fn record_offset(index: usize) -> usize {
    index * RECORD_SIZE
}

/// Number of children in a branch of `byte_size` bytes.
pub fn child_count(byte_size: usize) -> Result<usize, TreeError> {
    if byte_size < LAST_RECORD_SIZE || (byte_size - LAST_RECORD_SIZE) % RECORD_SIZE != 0 {
        return Err(TreeError::Corruption(format!(
            "branch of {byte_size} bytes is not a whole number of records"
        )));
    }
    Ok((byte_size - LAST_RECORD_SIZE) / RECORD_SIZE + 1)
}

/// Offsets of every embedded address in a branch of `byte_size` bytes.
pub fn addr_offsets(byte_size: usize) -> Result<Vec<usize>, TreeError> {
    Ok((0..child_count(byte_size)?).map(record_offset).collect())
}

/// Decode all child records of a branch.
pub fn read_children(node: &impl ReadableSpan) -> Result<Vec<ChildRecord>, TreeError> {
    let count = child_count(node.size())?;
    let mut children = Vec::with_capacity(count);
    for index in 0..count {
        let offset = record_offset(index);
        let key = if index + 1 < count {
            Some(node.read_value128(offset + KEY_OFFSET)?)
        } else {
            None
        };
        children.push(ChildRecord {
            addr: node.read_addr(offset)?,
            size: node.read_i64(offset + SIZE_OFFSET)?,
            key,
        });
    }
    Ok(children)
}

/// Right bound of child `index`.
#[must_use]
pub fn right_key_of(children: &[ChildRecord], index: usize, branch_right: Key) -> Key {
    children[index].key.unwrap_or(branch_right)
}

/// Left bound of child `index`.
#[must_use]
pub fn left_key_of(children: &[ChildRecord], index: usize, branch_left: Key, branch_right: Key) -> Key {
    if index == 0 {
        branch_left
    } else {
        right_key_of(children, index - 1, branch_right)
    }
}

/// Sum of all child sizes.
#[must_use]
pub fn total_size(children: &[ChildRecord]) -> i64 {
    children.iter().map(|c| c.size).sum()
}

/// Insert one record before the record at `offset`.
pub fn insert_single(
    buffer: &mut DataBuffer,
    offset: usize,
    addr: Addr,
    size: i64,
    key: Key,
) -> Result<(), StoreError> {
    buffer.shift(RECORD_SIZE as isize, offset)?;
    buffer.write_addr(offset, addr)?;
    buffer.write_i64(offset + SIZE_OFFSET, size)?;
    buffer.write_value128(offset + KEY_OFFSET, key)
}

/// Replace the child at `offset` with the two halves of a split.
///
/// The existing separator (if any) stays behind the right half.
pub fn insert_split(buffer: &mut DataBuffer, offset: usize, split: &SplitRecord) -> Result<(), StoreError> {
    buffer.shift(RECORD_SIZE as isize, offset + KEY_OFFSET)?;
    buffer.write_addr(offset, split.left)?;
    buffer.write_i64(offset + SIZE_OFFSET, split.left_size)?;
    buffer.write_value128(offset + KEY_OFFSET, split.key)?;
    buffer.write_addr(offset + RECORD_SIZE, split.right)?;
    buffer.write_i64(offset + RECORD_SIZE + SIZE_OFFSET, split.right_size)
}

/// Write a two-child branch into an empty buffer.
pub fn write_two_children(buffer: &mut DataBuffer, split: &SplitRecord) -> Result<(), StoreError> {
    buffer.write_addr(0, split.left)?;
    buffer.write_i64(SIZE_OFFSET, split.left_size)?;
    buffer.write_value128(KEY_OFFSET, split.key)?;
    buffer.write_addr(RECORD_SIZE, split.right)?;
    buffer.write_i64(RECORD_SIZE + SIZE_OFFSET, split.right_size)
}

/// Overwrite the size of the child at `offset`.
pub fn write_child_size(buffer: &mut DataBuffer, offset: usize, size: i64) -> Result<(), StoreError> {
    buffer.write_i64(offset + SIZE_OFFSET, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NodeKind;
    use crate::tree::key::{FAR_LEFT_KEY, FAR_RIGHT_KEY};
    use crate::types::Value128;

    fn leaf(id: u64) -> Addr {
        Addr::InMemory {
            kind: NodeKind::Leaf,
            id,
        }
    }

    fn empty_branch() -> DataBuffer {
        DataBuffer::new(
            Addr::InMemory {
                kind: NodeKind::Branch,
                id: 0,
            },
            4096,
        )
    }

    fn key(n: u64) -> Key {
        Value128::from_parts(0, n)
    }

    #[test]
    fn test_child_count() {
        assert_eq!(child_count(24).unwrap(), 1);
        assert_eq!(child_count(64).unwrap(), 2);
        assert_eq!(child_count(MAX_BRANCH_BYTES).unwrap(), MAX_BRANCH_CHILDREN);
        assert!(child_count(0).is_err());
        assert!(child_count(40).is_err());
    }

    #[test]
    fn test_two_children_then_insert() {
        let mut buf = empty_branch();
        write_two_children(
            &mut buf,
            &SplitRecord {
                left: leaf(0),
                left_size: 10,
                key: key(5),
                right: leaf(1),
                right_size: 20,
            },
        )
        .unwrap();

        // Insert before the right child.
        insert_single(&mut buf, record_offset(1), leaf(2), 7, key(6)).unwrap();

        let children = read_children(&buf).unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].addr, leaf(0));
        assert_eq!(children[1].addr, leaf(2));
        assert_eq!(children[1].key, Some(key(6)));
        assert_eq!(children[2].addr, leaf(1));
        assert_eq!(children[2].key, None);
        assert_eq!(total_size(&children), 37);
        assert_eq!(buf.addr_points().collect::<Vec<_>>(), vec![0, 40, 80]);
    }

    #[test]
    fn test_insert_split_keeps_trailing_separator() {
        let mut buf = empty_branch();
        write_two_children(
            &mut buf,
            &SplitRecord {
                left: leaf(0),
                left_size: 10,
                key: key(5),
                right: leaf(1),
                right_size: 20,
            },
        )
        .unwrap();

        insert_split(
            &mut buf,
            0,
            &SplitRecord {
                left: leaf(3),
                left_size: 4,
                key: key(2),
                right: leaf(4),
                right_size: 6,
            },
        )
        .unwrap();

        let children = read_children(&buf).unwrap();
        let keys: Vec<_> = children.iter().map(|c| c.key).collect();
        assert_eq!(keys, vec![Some(key(2)), Some(key(5)), None]);
        assert_eq!(children[0].addr, leaf(3));
        assert_eq!(children[1].addr, leaf(4));
        assert_eq!(children[1].size, 6);
        assert_eq!(children[2].addr, leaf(1));
    }

    #[test]
    fn test_key_bounds() {
        let children = vec![
            ChildRecord {
                addr: leaf(0),
                size: 1,
                key: Some(key(3)),
            },
            ChildRecord {
                addr: leaf(1),
                size: 1,
                key: None,
            },
        ];
        assert_eq!(left_key_of(&children, 0, FAR_LEFT_KEY, FAR_RIGHT_KEY), FAR_LEFT_KEY);
        assert_eq!(right_key_of(&children, 0, FAR_RIGHT_KEY), key(3));
        assert_eq!(left_key_of(&children, 1, FAR_LEFT_KEY, FAR_RIGHT_KEY), key(3));
        assert_eq!(right_key_of(&children, 1, FAR_RIGHT_KEY), FAR_RIGHT_KEY);
    }

    #[test]
    fn test_addr_offsets() {
        assert_eq!(addr_offsets(104).unwrap(), vec![0, 40, 80]);
    }
}
