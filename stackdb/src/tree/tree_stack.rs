//! A cursor over the byte streams of a copy-on-write tree.
//!
//! A `TreeStack` owns one transaction's `NodeStore` and the current root
//! address. It is parked on a key with `setup_stack_for_relative_position`
//! and then reads or writes bytes at that position, advancing as it goes.
//!
//! # Structure
//!
//! - Reads walk leaf by leaf through `seek::traverse_to_absolute_position`.
//! - Writes first copy the path they touch (`ensure_mutable_path`), then
//!   either overwrite existing leaves, grow the last leaf of the key, or
//!   insert new leaves (`insert_leaf_node`), splitting branches as needed.
//! - Every cursor move after a write goes through an absolute seek, so the
//!   path is always rebuilt from node data rather than patched by hand.
//!
//! # Locking
//!
//! Each public operation holds the stack's lock while it runs. A failed
//! write leaves the tree in an unknown state, so it invalidates the stack
//! and every later operation fails with `TreeError::Invalidated`.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use tracing::{debug, warn};

use crate::storage::{Addr, NodeKind, NodeStore, ReadableSpan, StoreError};
use crate::tree::diagnostics::{self, IntegrityReport};
use crate::tree::insert::{adjust_down_size, ensure_mutable_path, insert_leaf_node};
use crate::tree::key::Key;
use crate::tree::seek;
use crate::tree::stack::{StackEntry, StackState};

/// Bytes pulled from the tree per step while scanning a string.
const READ_STRING_CHUNK: usize = 4096;

/// Errors that can occur during tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// Node store error.
    Store(StoreError),
    /// A key or position outside what the tree can address.
    OutOfRange(String),
    /// Node data contradicts the tree's invariants.
    Corruption(String),
    /// Bytes for a missing key can only be inserted at its insertion point.
    NotAtInsertionPoint { position: i64 },
    /// An operation was started while another one holds the stack.
    AlreadyLocked,
    /// `unlock` without a matching `lock`.
    NotLocked,
    /// A previous write failed part way through.
    Invalidated,
    /// The stack has not been parked on a key.
    StackNotLoaded,
    /// Only UTF-8 strings are supported.
    UnsupportedEncoding(String),
    /// String bytes are not valid UTF-8.
    InvalidUtf8(std::string::FromUtf8Error),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::OutOfRange(msg) => write!(f, "out of range: {msg}"),
            Self::Corruption(msg) => write!(f, "tree corruption: {msg}"),
            Self::NotAtInsertionPoint { position } => {
                write!(f, "stack at {position} is not parked at an insertion point")
            }
            Self::AlreadyLocked => write!(f, "tree stack is already locked"),
            Self::NotLocked => write!(f, "tree stack is not locked"),
            Self::Invalidated => write!(f, "tree stack was invalidated by a failed write"),
            Self::StackNotLoaded => write!(f, "tree stack is not positioned on a key"),
            Self::UnsupportedEncoding(label) => write!(f, "unsupported string encoding: {label}"),
            Self::InvalidUtf8(e) => write!(f, "invalid UTF-8: {e}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::InvalidUtf8(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for TreeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// A cursor plus the transaction-private state of the tree it moves over.
pub struct TreeStack {
    store: NodeStore,
    root: Addr,
    originating_root: Addr,
    state: StackState,
    locked: bool,
    invalidated: bool,
}

impl TreeStack {
    /// Create a stack over the tree rooted at `root`.
    #[must_use]
    pub fn new(store: NodeStore, root: Addr) -> Self {
        Self {
            store,
            root,
            originating_root: root,
            state: StackState::default(),
            locked: false,
            invalidated: false,
        }
    }

    /// Current root, which changes as soon as the tree is written.
    #[must_use]
    pub const fn root_addr(&self) -> Addr {
        self.root
    }

    /// Root the stack was created on.
    #[must_use]
    pub const fn originating_root_addr(&self) -> Addr {
        self.originating_root
    }

    #[must_use]
    pub const fn state(&self) -> &StackState {
        &self.state
    }

    #[allow(clippy::missing_const_for_fn)] // mutable references can't be const
    pub fn store_mut(&mut self) -> &mut NodeStore {
        &mut self.store
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub const fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn lock(&mut self) -> Result<(), TreeError> {
        if self.invalidated {
            return Err(TreeError::Invalidated);
        }
        if self.locked {
            return Err(TreeError::AlreadyLocked);
        }
        self.locked = true;
        Ok(())
    }

    pub fn unlock(&mut self) -> Result<(), TreeError> {
        if !self.locked {
            return Err(TreeError::NotLocked);
        }
        self.locked = false;
        Ok(())
    }

    /// Drop the cursor and every private buffer. The stack is unusable
    /// afterwards.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
        self.locked = false;
        self.state.clear();
        self.store.discard();
    }

    fn with_lock<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T, TreeError>) -> Result<T, TreeError> {
        self.lock()?;
        let result = op(self);
        self.locked = false;
        result
    }

    fn with_write_lock<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, TreeError>,
    ) -> Result<T, TreeError> {
        let result = self.with_lock(op);
        match &result {
            Ok(_) | Err(TreeError::AlreadyLocked | TreeError::Invalidated) => {}
            Err(e) => {
                warn!(error = %e, "write failed, invalidating tree stack");
                self.invalidate();
            }
        }
        result
    }

    /// Park the stack `rel` bytes into `key`.
    ///
    /// `rel >= 0` counts from the first byte. `rel < 0` counts back from
    /// the end, where `-1` is the offset just past the last byte.
    pub fn setup_stack_for_relative_position(&mut self, key: Key, rel: i64) -> Result<(), TreeError> {
        self.with_lock(|t| seek::setup_for_relative_position(&mut t.store, &mut t.state, t.root, key, rel))
    }

    /// Position relative to the end the stack was set up from.
    pub fn relative_position(&self) -> Result<i64, TreeError> {
        self.check_loaded()?;
        self.state.relative_position().ok_or(TreeError::StackNotLoaded)
    }

    #[must_use]
    pub const fn absolute_position(&self) -> i64 {
        self.state.absolute_position
    }

    /// Absolute offset of the first byte of `key`.
    pub fn key_start(&mut self, key: Key) -> Result<i64, TreeError> {
        self.with_lock(|t| seek::key_start(&mut t.store, t.root, key))
    }

    /// Absolute offset just past the last byte of `key`.
    pub fn key_end(&mut self, key: Key) -> Result<i64, TreeError> {
        self.with_lock(|t| seek::key_end(&mut t.store, t.root, key))
    }

    /// Number of bytes stored under `key`.
    pub fn key_size(&mut self, key: Key) -> Result<i64, TreeError> {
        self.with_lock(|t| {
            let start = seek::key_start(&mut t.store, t.root, key)?;
            let end = seek::key_end(&mut t.store, t.root, key)?;
            Ok(end - start)
        })
    }

    /// Read up to `dst.len()` bytes at the cursor and advance past them.
    ///
    /// Returns fewer bytes than requested at the end of the key.
    pub fn read_buffer(&mut self, dst: &mut [u8]) -> Result<usize, TreeError> {
        self.with_lock(|t| t.read_into(dst))
    }

    /// Write `src` at the cursor, overwriting and then extending the key's
    /// bytes, and advance past them.
    pub fn write_buffer(&mut self, src: &[u8]) -> Result<usize, TreeError> {
        self.with_write_lock(|t| t.write_from(src))
    }

    /// `None` at the end of the key.
    pub fn read_u8(&mut self) -> Result<Option<u8>, TreeError> {
        let mut byte = [0u8];
        Ok((self.read_buffer(&mut byte)? == 1).then_some(byte[0]))
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), TreeError> {
        self.write_buffer(&[value]).map(|_| ())
    }

    /// Read a UTF-8 string at the cursor.
    ///
    /// Stops after `max_chars` characters, at the end of the key, or (when
    /// `zero_terminated`) after a zero byte, which is consumed but not
    /// returned.
    pub fn read_string(&mut self, max_chars: Option<usize>, zero_terminated: bool) -> Result<String, TreeError> {
        self.with_lock(|t| t.read_string_at_cursor(max_chars, zero_terminated))
    }

    /// Write `s` as UTF-8, followed by a zero byte when `zero_terminated`.
    pub fn write_string(&mut self, s: &str, zero_terminated: bool) -> Result<usize, TreeError> {
        if !zero_terminated {
            return self.write_buffer(s.as_bytes());
        }
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.write_buffer(&bytes)
    }

    /// Every in-memory node reachable from the root, branches first.
    pub fn get_all_in_memory_addresses(&mut self) -> Result<Vec<Addr>, TreeError> {
        self.with_lock(|t| diagnostics::collect_in_memory_addresses(&mut t.store, t.root))
    }

    pub fn check_tree_integrity(&mut self) -> Result<IntegrityReport, TreeError> {
        self.with_lock(|t| diagnostics::check_integrity(&mut t.store, t.root))
    }

    pub fn dump_tree_branches(&mut self) -> Result<String, TreeError> {
        self.with_lock(|t| diagnostics::dump_branches(&mut t.store, t.root))
    }

    #[must_use]
    pub fn dump_stack_state(&self) -> String {
        self.state.to_string()
    }

    fn check_loaded(&self) -> Result<(), TreeError> {
        if self.invalidated {
            return Err(TreeError::Invalidated);
        }
        if !self.state.is_loaded() {
            return Err(TreeError::StackNotLoaded);
        }
        Ok(())
    }

    fn desired_key(&self) -> Result<Key, TreeError> {
        self.check_loaded()?;
        self.state.desired_key.ok_or(TreeError::StackNotLoaded)
    }

    fn leaf_entry(&self) -> Result<StackEntry, TreeError> {
        self.state.last().cloned().ok_or(TreeError::StackNotLoaded)
    }

    fn reload_at(&mut self, pos: i64) -> Result<(), TreeError> {
        seek::load_absolute_position(&mut self.store, &mut self.state, self.root, pos)
    }

    fn read_into(&mut self, dst: &mut [u8]) -> Result<usize, TreeError> {
        let key = self.desired_key()?;
        let mut done = 0;
        while done < dst.len() && self.state.at_desired_key() {
            let leaf = self.leaf_entry()?;
            if leaf.right_key != key {
                break;
            }
            let pos = self.state.absolute_position;
            let in_leaf = (pos - leaf.left_offset) as usize;
            let n = (leaf.down_size as usize - in_leaf).min(dst.len() - done);
            self.store.get(leaf.down_addr)?.read_into(in_leaf, &mut dst[done..done + n])?;
            done += n;
            seek::traverse_to_absolute_position(&mut self.store, &mut self.state, pos + n as i64)?;
        }
        Ok(done)
    }

    fn write_from(&mut self, src: &[u8]) -> Result<usize, TreeError> {
        let key = self.desired_key()?;
        if src.is_empty() {
            return Ok(0);
        }

        if !self.state.at_desired_key() {
            let pos = self.state.absolute_position;
            if self.state.absolute_start != Some(pos) || self.state.absolute_end != Some(pos) {
                return Err(TreeError::NotAtInsertionPoint { position: pos });
            }
            let n = src.len() as i64;
            self.insert_leaves(pos, key, src)?;
            self.state.absolute_end = Some(pos + n);
            self.reload_at(pos + n)?;
            return Ok(src.len());
        }

        let mut written = 0;
        while written < src.len() {
            let leaf = self.leaf_entry()?;
            if leaf.right_key != key {
                self.append_at_end(key, &src[written..])?;
                return Ok(src.len());
            }
            ensure_mutable_path(&mut self.store, &mut self.state, &mut self.root, true)?;
            let leaf_addr = self.leaf_entry()?.down_addr;
            let pos = self.state.absolute_position;
            let in_leaf = (pos - leaf.left_offset) as usize;
            let n = (leaf.down_size as usize - in_leaf).min(src.len() - written);
            self.store
                .buffer_mut(leaf_addr)?
                .write_bytes(in_leaf, &src[written..written + n])?;
            written += n;
            seek::traverse_to_absolute_position(&mut self.store, &mut self.state, pos + n as i64)?;
        }
        Ok(written)
    }

    /// Append `src` to `key`, whose end the stack is parked on.
    ///
    /// The key's last leaf is grown in place first if it fits all of `src`
    /// or is under 80% full. Whatever is left becomes new leaves.
    fn append_at_end(&mut self, key: Key, src: &[u8]) -> Result<(), TreeError> {
        let end = self.state.absolute_position;
        let n = src.len() as i64;
        let limit = self.store.node_data_byte_size_limit() as i64;

        // Peek at the previous leaf without disturbing the live cursor.
        let mut scratch = self.state.clone();
        seek::traverse_to_absolute_position(&mut self.store, &mut scratch, end - 1)?;
        let previous = scratch.last().cloned().ok_or(TreeError::StackNotLoaded)?;

        let mut grown = 0i64;
        if previous.right_key == key {
            let room = (limit - previous.down_size).max(0);
            let worth_growing = n <= room || previous.down_size * 5 < limit * 4;
            if worth_growing && room > 0 {
                ensure_mutable_path(&mut self.store, &mut scratch, &mut self.root, true)?;
                let leaf_addr = scratch.last().ok_or(TreeError::StackNotLoaded)?.down_addr;
                grown = n.min(room);
                self.store.buffer_mut(leaf_addr)?.append(&src[..grown as usize])?;
                let level = scratch.len() - 1;
                adjust_down_size(&mut self.store, &mut scratch, level, grown)?;
                debug!(leaf = %leaf_addr, grown, "grew leaf in place");
            }
        }

        if grown < n {
            self.insert_leaves(end + grown, key, &src[grown as usize..])?;
        }
        if let Some(e) = self.state.absolute_end.as_mut() {
            *e += n;
        }
        self.reload_at(end + n)
    }

    /// Insert `bytes` as new leaves of `key` starting at the leaf boundary
    /// `pos`.
    ///
    /// Chunks go in back to front so each one lands in front of the one
    /// inserted before it.
    fn insert_leaves(&mut self, pos: i64, key: Key, bytes: &[u8]) -> Result<(), TreeError> {
        let limit = self.store.node_data_byte_size_limit();
        for chunk in bytes.chunks(limit).rev() {
            self.reload_at(pos)?;
            ensure_mutable_path(&mut self.store, &mut self.state, &mut self.root, false)?;
            let leaf = self.store.create_empty_data_buffer(NodeKind::Leaf);
            self.store.buffer_mut(leaf)?.append(chunk)?;
            insert_leaf_node(
                &mut self.store,
                &mut self.state,
                &mut self.root,
                key,
                leaf,
                chunk.len() as i64,
            )?;
        }
        debug!(%key, leaves = bytes.len().div_ceil(limit), bytes = bytes.len(), "inserted leaves");
        Ok(())
    }

    fn read_string_at_cursor(
        &mut self,
        max_chars: Option<usize>,
        zero_terminated: bool,
    ) -> Result<String, TreeError> {
        let mut bytes = Vec::new();
        let mut chars = 0usize;
        let mut chunk = vec![0u8; READ_STRING_CHUNK];
        loop {
            let chunk_start = self.state.absolute_position;
            let got = self.read_into(&mut chunk)?;

            let mut consumed = None;
            for (i, &b) in chunk[..got].iter().enumerate() {
                if zero_terminated && b == 0 {
                    consumed = Some(i + 1);
                    break;
                }
                // Continuation bytes never start a character.
                if b & 0xc0 != 0x80 {
                    if max_chars.is_some_and(|max| chars == max) {
                        consumed = Some(i);
                        break;
                    }
                    chars += 1;
                }
                bytes.push(b);
            }

            if let Some(consumed) = consumed {
                if consumed < got {
                    seek::traverse_to_absolute_position(
                        &mut self.store,
                        &mut self.state,
                        chunk_start + consumed as i64,
                    )?;
                }
                break;
            }
            if got < chunk.len() {
                break;
            }
        }
        String::from_utf8(bytes).map_err(TreeError::InvalidUtf8)
    }
}

impl std::fmt::Debug for TreeStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeStack")
            .field("root", &self.root)
            .field("originating_root", &self.originating_root)
            .field("locked", &self.locked)
            .field("invalidated", &self.invalidated)
            .finish_non_exhaustive()
    }
}
