//! Copy-on-write mutation of a loaded path.
//!
//! # Invariants
//!
//! - Before any node on the path is written, every ancestor of it is an
//!   in-memory buffer, so writes never reach a stored node.
//! - After `insert_leaf_node` the stack is stale; callers reload it.

use tracing::debug;

use crate::storage::{Addr, NodeKind, NodeStore, ReadableSpan};
use crate::tree::branch::{self, MAX_BRANCH_CHILDREN, RECORD_SIZE, SplitRecord};
use crate::tree::key::Key;
use crate::tree::stack::StackState;
use crate::tree::tree_stack::TreeError;

/// Replace every stored node on the path with an in-memory copy.
///
/// Branches are always made mutable; the leaf only when `include_leaf`.
/// A sparse leaf becomes a zero-filled buffer. `root` is updated when the
/// root itself is copied.
pub fn ensure_mutable_path(
    store: &mut NodeStore,
    state: &mut StackState,
    root: &mut Addr,
    include_leaf: bool,
) -> Result<(), TreeError> {
    let len = state.len();
    if len == 0 {
        return Err(TreeError::StackNotLoaded);
    }
    let upto = if include_leaf { len } else { len - 1 };
    let mut copied = 0usize;
    for level in 0..upto {
        let entry = state.entry(level).ok_or(TreeError::StackNotLoaded)?;
        let addr = entry.down_addr;
        let addr_offset = entry.addr_offset;
        let new_addr = if NodeStore::can_convert_to_buffer(addr) {
            let span = store.get_span(addr)?;
            let points = if addr.is_branch() {
                branch::addr_offsets(span.size())?
            } else {
                Vec::new()
            };
            store.convert_span_to_buffer(&span, points)?
        } else if addr.is_sparse() && level + 1 == len {
            store.materialize_sparse(addr)?
        } else {
            continue;
        };

        if let Some(entry) = state.entry_mut(level) {
            entry.down_addr = new_addr;
        }
        if level == 0 {
            *root = new_addr;
        } else {
            let parent = state
                .entry(level - 1)
                .ok_or(TreeError::StackNotLoaded)?
                .down_addr;
            store.buffer_mut(parent)?.write_addr(addr_offset, new_addr)?;
        }
        copied += 1;
    }
    if copied > 0 {
        debug!(copied, "made path mutable");
    }
    Ok(())
}

/// Add `delta` to the recorded size of the child at every level from
/// `level` up to (but not including) the root.
pub fn adjust_down_size(
    store: &mut NodeStore,
    state: &mut StackState,
    level: usize,
    delta: i64,
) -> Result<(), TreeError> {
    for j in (1..=level).rev() {
        let (addr_offset, down_size) = {
            let entry = state.entry_mut(j).ok_or(TreeError::StackNotLoaded)?;
            entry.down_size += delta;
            (entry.addr_offset, entry.down_size)
        };
        let parent = state.entry(j - 1).ok_or(TreeError::StackNotLoaded)?.down_addr;
        branch::write_child_size(store.buffer_mut(parent)?, addr_offset, down_size)?;
    }
    Ok(())
}

enum Pending {
    Single { addr: Addr, size: i64, key: Key },
    Split(SplitRecord),
}

impl Pending {
    fn write_into(&self, store: &mut NodeStore, branch_addr: Addr, offset: usize) -> Result<(), TreeError> {
        let buffer = store.buffer_mut(branch_addr)?;
        match self {
            Self::Single { addr, size, key } => branch::insert_single(buffer, offset, *addr, *size, *key)?,
            Self::Split(split) => branch::insert_split(buffer, offset, split)?,
        }
        Ok(())
    }
}

fn branch_size(store: &mut NodeStore, addr: Addr) -> Result<i64, TreeError> {
    let node = store.get(addr)?;
    Ok(branch::total_size(&branch::read_children(&node)?))
}

/// Split a full branch and apply `pending` at `offset` to whichever half
/// now holds that position.
fn split_branch(
    store: &mut NodeStore,
    branch_addr: Addr,
    offset: usize,
    pending: &Pending,
) -> Result<SplitRecord, TreeError> {
    let index = offset / RECORD_SIZE;
    let mut mid = MAX_BRANCH_CHILDREN / 2;
    if mid == index {
        mid += 1;
    }
    let keep = branch::record_offset(mid) + branch::KEY_OFFSET;
    let right_start = branch::record_offset(mid + 1);

    let (key, moved) = {
        let left = store.buffer_mut(branch_addr)?;
        let key = left.read_value128(keep)?;
        let moved = left.extract(right_start, left.size() - right_start)?;
        left.set_size(keep)?;
        (key, moved)
    };

    let right = store.create_empty_data_buffer(NodeKind::Branch);
    store.buffer_mut(right)?.write_extract(0, &moved)?;

    if index > mid {
        pending.write_into(store, right, offset - right_start)?;
    } else {
        pending.write_into(store, branch_addr, offset)?;
    }

    Ok(SplitRecord {
        left: branch_addr,
        left_size: branch_size(store, branch_addr)?,
        key,
        right,
        right_size: branch_size(store, right)?,
    })
}

/// Insert `leaf` (holding `leaf_size` bytes of `key`) immediately before
/// the leaf the stack is parked on.
///
/// Every branch on the path must already be mutable. Full branches split
/// upwards; a split root grows a new root.
pub fn insert_leaf_node(
    store: &mut NodeStore,
    state: &mut StackState,
    root: &mut Addr,
    key: Key,
    leaf: Addr,
    leaf_size: i64,
) -> Result<(), TreeError> {
    let mut level = state.len().checked_sub(1).ok_or(TreeError::StackNotLoaded)?;
    if level == 0 {
        return Err(TreeError::Corruption("root is not a branch".to_string()));
    }
    let mut pending = Pending::Single {
        addr: leaf,
        size: leaf_size,
        key,
    };
    loop {
        let branch_addr = state.entry(level - 1).ok_or(TreeError::StackNotLoaded)?.down_addr;
        let offset = state.entry(level).ok_or(TreeError::StackNotLoaded)?.addr_offset;
        let count = branch::child_count(store.buffer_mut(branch_addr)?.size())?;

        if count < MAX_BRANCH_CHILDREN {
            pending.write_into(store, branch_addr, offset)?;
            adjust_down_size(store, state, level - 1, leaf_size)?;
            return Ok(());
        }

        let split = split_branch(store, branch_addr, offset, &pending)?;
        debug!(
            level = level - 1,
            left = %split.left,
            right = %split.right,
            "split branch"
        );

        if level == 1 {
            let new_root = store.create_empty_data_buffer(NodeKind::Branch);
            branch::write_two_children(store.buffer_mut(new_root)?, &split)?;
            *root = new_root;
            debug!(root = %new_root, "tree grew a level");
            return Ok(());
        }
        pending = Pending::Split(split);
        level -= 1;
    }
}
