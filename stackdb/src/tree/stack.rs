//! The root-to-leaf path a tree stack is parked on.

use std::fmt;

use crate::storage::Addr;
use crate::tree::key::{FAR_LEFT_KEY, FAR_RIGHT_KEY, Key};

/// One level of the path.
///
/// Entry 0 describes the root: its `down_addr` is the root address and its
/// `down_size` is `-1` (unbounded). Every other entry describes the child
/// that was descended into from the previous level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    /// Offset of this child's record within the parent branch.
    pub addr_offset: usize,
    pub down_addr: Addr,
    pub down_size: i64,
    /// Absolute byte offset of the child's first byte.
    pub left_offset: i64,
    pub left_key: Key,
    pub right_key: Key,
}

impl StackEntry {
    #[must_use]
    pub const fn root(addr: Addr) -> Self {
        Self {
            addr_offset: 0,
            down_addr: addr,
            down_size: -1,
            left_offset: 0,
            left_key: FAR_LEFT_KEY,
            right_key: FAR_RIGHT_KEY,
        }
    }

    /// True if the absolute offset `pos` lies under this entry.
    #[must_use]
    pub const fn contains(&self, pos: i64) -> bool {
        if self.down_size < 0 {
            return true;
        }
        pos >= self.left_offset && pos < self.left_offset + self.down_size
    }

    /// Absolute offset just past the child.
    #[must_use]
    pub const fn right_offset(&self) -> i64 {
        self.left_offset + self.down_size
    }
}

/// Which end of its key a stack's relative position is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionOrigin {
    #[default]
    Start,
    End,
}

/// A loaded path plus the position bookkeeping around it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackState {
    entries: Vec<StackEntry>,
    /// Key the caller asked for.
    pub desired_key: Option<Key>,
    /// Key whose bytes are under the current position, or the right bound
    /// of the current leaf when `desired_key` has no bytes there.
    pub loaded_key: Option<Key>,
    pub absolute_position: i64,
    /// Absolute offset of the key's first byte, once known.
    pub absolute_start: Option<i64>,
    /// Absolute offset just past the key's last byte, once known.
    pub absolute_end: Option<i64>,
    pub origin: PositionOrigin,
}

impl StackState {
    /// Forget everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        !self.entries.is_empty() && self.desired_key.is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    #[must_use]
    pub fn entry(&self, level: usize) -> Option<&StackEntry> {
        self.entries.get(level)
    }

    pub fn entry_mut(&mut self, level: usize) -> Option<&mut StackEntry> {
        self.entries.get_mut(level)
    }

    #[must_use]
    pub fn last(&self) -> Option<&StackEntry> {
        self.entries.last()
    }

    pub fn push(&mut self, entry: StackEntry) {
        self.entries.push(entry);
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// True if the desired key has bytes at the current position.
    #[must_use]
    pub fn at_desired_key(&self) -> bool {
        self.desired_key.is_some() && self.loaded_key == self.desired_key
    }

    /// Position relative to whichever end the stack was set up from.
    ///
    /// From the start this is `position - start`; from the end it is
    /// `position - end - 1`, so the end of the key itself is `-1`.
    #[must_use]
    pub fn relative_position(&self) -> Option<i64> {
        match self.origin {
            PositionOrigin::Start => self.absolute_start.map(|s| self.absolute_position - s),
            PositionOrigin::End => self.absolute_end.map(|e| self.absolute_position - e - 1),
        }
    }

    /// Recompute which key the current position belongs to.
    pub fn refresh_loaded_key(&mut self) {
        let (Some(key), Some(last)) = (self.desired_key, self.entries.last()) else {
            self.loaded_key = None;
            return;
        };
        self.loaded_key = if last.left_offset == self.absolute_position && last.left_key == key {
            Some(key)
        } else {
            Some(last.right_key)
        };
    }
}

fn fmt_key(key: Option<Key>) -> String {
    key.map_or_else(|| "-".to_string(), |k| k.to_string())
}

fn fmt_offset(offset: Option<i64>) -> String {
    offset.map_or_else(|| "?".to_string(), |o| o.to_string())
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "desired={} loaded={} position={} start={} end={} origin={:?}",
            fmt_key(self.desired_key),
            fmt_key(self.loaded_key),
            self.absolute_position,
            fmt_offset(self.absolute_start),
            fmt_offset(self.absolute_end),
            self.origin,
        )?;
        for (level, e) in self.entries.iter().enumerate() {
            writeln!(
                f,
                "  [{level}] @{} {} size={} left={} keys=({}, {}]",
                e.addr_offset, e.down_addr, e.down_size, e.left_offset, e.left_key, e.right_key
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NodeKind;
    use crate::types::Value128;

    fn entry(left_offset: i64, down_size: i64) -> StackEntry {
        StackEntry {
            addr_offset: 0,
            down_addr: Addr::Stored {
                kind: NodeKind::Leaf,
                id: 1,
            },
            down_size,
            left_offset,
            left_key: FAR_LEFT_KEY,
            right_key: FAR_RIGHT_KEY,
        }
    }

    #[test]
    fn test_root_contains_everything() {
        let root = StackEntry::root(Addr::Sparse { size: 1 });
        assert!(root.contains(0));
        assert!(root.contains(i64::MAX));
    }

    #[test]
    fn test_contains_is_half_open() {
        let e = entry(10, 5);
        assert!(!e.contains(9));
        assert!(e.contains(10));
        assert!(e.contains(14));
        assert!(!e.contains(15));
        assert_eq!(e.right_offset(), 15);
    }

    #[test]
    fn test_relative_position() {
        let mut state = StackState {
            absolute_position: 12,
            absolute_start: Some(10),
            absolute_end: Some(20),
            ..StackState::default()
        };
        assert_eq!(state.relative_position(), Some(2));
        state.origin = PositionOrigin::End;
        assert_eq!(state.relative_position(), Some(-9));
        state.absolute_position = 20;
        assert_eq!(state.relative_position(), Some(-1));
    }

    #[test]
    fn test_refresh_loaded_key() {
        let k = Value128::from_parts(0, 7);
        let mut e = entry(4, 3);
        e.left_key = k;
        e.right_key = Value128::from_parts(0, 9);
        let mut state = StackState {
            desired_key: Some(k),
            absolute_position: 4,
            ..StackState::default()
        };
        state.push(e);
        state.refresh_loaded_key();
        assert_eq!(state.loaded_key, Some(k));

        state.absolute_position = 5;
        state.refresh_loaded_key();
        assert_eq!(state.loaded_key, Some(Value128::from_parts(0, 9)));
        assert!(!state.at_desired_key());
    }
}
