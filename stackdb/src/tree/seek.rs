//! Loading a stack: descent by key and by absolute byte offset.
//!
//! Every descent reads the current branch, picks a child, and pushes a
//! `StackEntry` for it until a leaf is reached. The three descents differ
//! only in how the child is picked:
//!
//! - start of key: first child whose right bound is `>= key`
//! - end of key: last child whose left bound is `<= key`
//! - absolute offset: the child whose byte range holds the offset

use crate::storage::{Addr, NodeStore};
use crate::tree::branch::{self, ChildRecord, RECORD_SIZE};
use crate::tree::key::{Key, is_sentinel};
use crate::tree::stack::{PositionOrigin, StackEntry, StackState};
use crate::tree::tree_stack::TreeError;

fn read_branch(store: &mut NodeStore, addr: Addr) -> Result<Vec<ChildRecord>, TreeError> {
    if !addr.is_branch() {
        return Err(TreeError::Corruption(format!("expected a branch at {addr}")));
    }
    let node = store.get(addr)?;
    branch::read_children(&node)
}

fn child_entry(children: &[ChildRecord], index: usize, parent: &StackEntry, left_offset: i64) -> StackEntry {
    let child = &children[index];
    StackEntry {
        addr_offset: branch::record_offset(index),
        down_addr: child.addr,
        down_size: child.size,
        left_offset,
        left_key: branch::left_key_of(children, index, parent.left_key, parent.right_key),
        right_key: branch::right_key_of(children, index, parent.right_key),
    }
}

fn last_entry(state: &StackState) -> Result<&StackEntry, TreeError> {
    state.last().ok_or(TreeError::StackNotLoaded)
}

fn check_key(key: Key) -> Result<(), TreeError> {
    if is_sentinel(&key) {
        return Err(TreeError::OutOfRange(format!("{key} is a reserved key")));
    }
    Ok(())
}

fn descend_to_start_of_key(store: &mut NodeStore, state: &mut StackState, key: Key) -> Result<(), TreeError> {
    loop {
        let parent = last_entry(state)?.clone();
        if parent.down_addr.is_leaf() {
            return Ok(());
        }
        let children = read_branch(store, parent.down_addr)?;
        let mut offset = parent.left_offset;
        let mut found = None;
        for (index, child) in children.iter().enumerate() {
            if branch::right_key_of(&children, index, parent.right_key) >= key {
                found = Some(child_entry(&children, index, &parent, offset));
                break;
            }
            offset += child.size;
        }
        let entry = found.ok_or_else(|| {
            TreeError::Corruption(format!("no child of {} reaches key {key}", parent.down_addr))
        })?;
        state.push(entry);
    }
}

fn descend_to_end_of_key(store: &mut NodeStore, state: &mut StackState, key: Key) -> Result<(), TreeError> {
    loop {
        let parent = last_entry(state)?.clone();
        if parent.down_addr.is_leaf() {
            return Ok(());
        }
        let children = read_branch(store, parent.down_addr)?;
        let mut offset = parent.left_offset;
        let mut found = None;
        for index in 0..children.len() {
            if branch::left_key_of(&children, index, parent.left_key, parent.right_key) > key {
                break;
            }
            found = Some(child_entry(&children, index, &parent, offset));
            offset += children[index].size;
        }
        let entry = found.ok_or_else(|| {
            TreeError::Corruption(format!("no child of {} starts at or before key {key}", parent.down_addr))
        })?;
        state.push(entry);
    }
}

/// Descend to the leaf holding `pos`.
///
/// `hint` is a `(child index, left offset)` pair to start the search from in
/// the first branch visited.
fn descend_to_position(
    store: &mut NodeStore,
    state: &mut StackState,
    pos: i64,
    mut hint: Option<(usize, i64)>,
) -> Result<(), TreeError> {
    loop {
        let parent = last_entry(state)?.clone();
        if parent.down_addr.is_leaf() {
            return Ok(());
        }
        let children = read_branch(store, parent.down_addr)?;
        let (mut index, mut offset) = match hint.take() {
            Some((index, offset)) if index < children.len() => (index, offset),
            _ => (0, parent.left_offset),
        };
        while pos < offset {
            if index == 0 {
                return Err(TreeError::OutOfRange(format!("offset {pos} is before the tree")));
            }
            index -= 1;
            offset -= children[index].size;
        }
        while pos >= offset + children[index].size {
            offset += children[index].size;
            index += 1;
            if index >= children.len() {
                return Err(TreeError::OutOfRange(format!("offset {pos} is past the tree")));
            }
        }
        state.push(child_entry(&children, index, &parent, offset));
    }
}

/// Load the path to the first byte of `key`.
///
/// If the key has no bytes the stack is parked where its bytes would be,
/// with start and end both at that offset.
pub fn load_to_start_of_key(
    store: &mut NodeStore,
    state: &mut StackState,
    root: Addr,
    key: Key,
) -> Result<(), TreeError> {
    check_key(key)?;
    state.clear();
    state.push(StackEntry::root(root));
    descend_to_start_of_key(store, state, key)?;

    let leaf = last_entry(state)?.clone();
    state.desired_key = Some(key);
    state.loaded_key = Some(leaf.right_key);
    state.absolute_position = leaf.left_offset;
    state.absolute_start = Some(leaf.left_offset);
    state.absolute_end = (leaf.right_key != key).then_some(leaf.left_offset);
    state.origin = PositionOrigin::Start;
    Ok(())
}

/// Load the path to the offset just past the last byte of `key`.
pub fn load_to_end_of_key(
    store: &mut NodeStore,
    state: &mut StackState,
    root: Addr,
    key: Key,
) -> Result<(), TreeError> {
    check_key(key)?;
    state.clear();
    state.push(StackEntry::root(root));
    descend_to_end_of_key(store, state, key)?;

    let leaf = last_entry(state)?.clone();
    let present = leaf.left_key == key;
    state.desired_key = Some(key);
    state.loaded_key = Some(if present { key } else { leaf.right_key });
    state.absolute_position = leaf.left_offset;
    state.absolute_start = (!present).then_some(leaf.left_offset);
    state.absolute_end = Some(leaf.left_offset);
    state.origin = PositionOrigin::End;
    Ok(())
}

/// Move an already loaded stack to the absolute offset `pos`.
///
/// Only the levels that do not cover `pos` are reloaded.
pub fn traverse_to_absolute_position(
    store: &mut NodeStore,
    state: &mut StackState,
    pos: i64,
) -> Result<(), TreeError> {
    if pos < 0 {
        return Err(TreeError::OutOfRange(format!("offset {pos} is negative")));
    }
    let last_level = state.len().checked_sub(1).ok_or(TreeError::StackNotLoaded)?;
    if !last_entry(state)?.contains(pos) {
        let mut level = last_level;
        while level > 1 && !state.entry(level - 1).is_some_and(|e| e.contains(pos)) {
            level -= 1;
        }
        let hint = state
            .entry(level)
            .map(|e| (e.addr_offset / RECORD_SIZE, e.left_offset));
        state.truncate(level);
        descend_to_position(store, state, pos, hint)?;
    }
    state.absolute_position = pos;
    state.refresh_loaded_key();
    Ok(())
}

/// Reload the whole path from `root` to the absolute offset `pos`.
///
/// Position bookkeeping other than the path is kept.
pub fn load_absolute_position(
    store: &mut NodeStore,
    state: &mut StackState,
    root: Addr,
    pos: i64,
) -> Result<(), TreeError> {
    if pos < 0 {
        return Err(TreeError::OutOfRange(format!("offset {pos} is negative")));
    }
    state.truncate(0);
    state.push(StackEntry::root(root));
    descend_to_position(store, state, pos, None)?;
    state.absolute_position = pos;
    state.refresh_loaded_key();
    Ok(())
}

/// Park the stack at `rel` bytes from one end of `key`.
///
/// `rel >= 0` counts from the first byte; `rel < 0` counts back from the
/// end, `-1` being the offset just past the last byte.
pub fn setup_for_relative_position(
    store: &mut NodeStore,
    state: &mut StackState,
    root: Addr,
    key: Key,
    rel: i64,
) -> Result<(), TreeError> {
    if rel < 0 {
        load_to_end_of_key(store, state, root, key)?;
        if rel < -1 {
            let end = state.absolute_end.ok_or(TreeError::StackNotLoaded)?;
            let start = match state.absolute_start {
                Some(start) => start,
                None => key_start(store, root, key)?,
            };
            state.absolute_start = Some(start);
            let target = end + rel + 1;
            if target < start {
                return Err(TreeError::OutOfRange(format!(
                    "{rel} is before the start of {key}"
                )));
            }
            traverse_to_absolute_position(store, state, target)?;
        }
    } else {
        load_to_start_of_key(store, state, root, key)?;
        if rel > 0 {
            let start = state.absolute_start.ok_or(TreeError::StackNotLoaded)?;
            let end = match state.absolute_end {
                Some(end) => end,
                None => key_end(store, root, key)?,
            };
            state.absolute_end = Some(end);
            let target = start + rel;
            if target > end {
                return Err(TreeError::OutOfRange(format!("{rel} is past the end of {key}")));
            }
            traverse_to_absolute_position(store, state, target)?;
        }
    }
    Ok(())
}

/// Absolute offset of the first byte of `key`.
pub fn key_start(store: &mut NodeStore, root: Addr, key: Key) -> Result<i64, TreeError> {
    let mut scratch = StackState::default();
    load_to_start_of_key(store, &mut scratch, root, key)?;
    scratch.absolute_start.ok_or(TreeError::StackNotLoaded)
}

/// Absolute offset just past the last byte of `key`.
pub fn key_end(store: &mut NodeStore, root: Addr, key: Key) -> Result<i64, TreeError> {
    let mut scratch = StackState::default();
    load_to_end_of_key(store, &mut scratch, root, key)?;
    scratch.absolute_end.ok_or(TreeError::StackNotLoaded)
}
