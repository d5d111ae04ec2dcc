//! Cursors over the bytes of one key.

use crate::database::transaction::{Transaction, TransactionError};
use crate::tree::{Key, TreeError, TreeStack};

/// Text encodings a string can be read or written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringEncoding {
    #[default]
    Utf8,
}

impl StringEncoding {
    /// Resolve an encoding label such as `"utf-8"`.
    pub fn from_label(label: &str) -> Result<Self, TreeError> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" | "unicode-1-1-utf-8" => Ok(Self::Utf8),
            _ => Err(TreeError::UnsupportedEncoding(label.to_string())),
        }
    }
}

/// How `DataValue::read_string` decides where a string ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStringOptions {
    /// Stop after this many characters.
    pub max_chars: Option<usize>,
    /// Stop after (and consume) a zero byte.
    pub zero_terminated: bool,
    pub encoding: StringEncoding,
}

/// A cursor over the bytes stored under one key.
///
/// The position is kept relative to one end of the value: non-negative
/// positions count from the first byte, negative ones from the end, with
/// `-1` meaning just past the last byte. A cursor at `-1` stays at the end
/// while the value grows.
#[derive(Debug)]
pub struct DataValue<'t> {
    txn: &'t Transaction,
    key: Key,
    position: i64,
}

impl<'t> DataValue<'t> {
    pub(crate) const fn new(txn: &'t Transaction, key: Key) -> Self {
        Self {
            txn,
            key,
            position: 0,
        }
    }

    #[must_use]
    pub const fn key(&self) -> Key {
        self.key
    }

    /// Absolute offset of the first byte within the whole tree.
    pub fn start(&self) -> Result<i64, TransactionError> {
        let key = self.key;
        self.txn.with_tree(|tree| tree.key_start(key))
    }

    /// Absolute offset just past the last byte within the whole tree.
    pub fn end(&self) -> Result<i64, TransactionError> {
        let key = self.key;
        self.txn.with_tree(|tree| tree.key_end(key))
    }

    /// Number of bytes stored under the key.
    pub fn size(&self) -> Result<i64, TransactionError> {
        self.txn.key_size(self.key)
    }

    /// Position measured from the first byte.
    pub fn position(&self) -> Result<i64, TransactionError> {
        if self.position >= 0 {
            Ok(self.position)
        } else {
            Ok(self.size()? + self.position + 1)
        }
    }

    /// Position as set, possibly relative to the end.
    #[must_use]
    pub const fn relative_position(&self) -> i64 {
        self.position
    }

    /// Move the cursor. Fails if the position lies outside the value.
    pub fn set_position(&mut self, position: i64) -> Result<(), TransactionError> {
        let key = self.key;
        self.txn
            .with_tree(|tree| tree.setup_stack_for_relative_position(key, position))?;
        self.position = position;
        Ok(())
    }

    /// Park the stack at the cursor, run `op`, and keep the position the
    /// stack ended up at.
    fn run<T>(
        &mut self,
        op: impl FnOnce(&mut TreeStack) -> Result<T, TreeError>,
    ) -> Result<T, TransactionError> {
        let key = self.key;
        let position = self.position;
        let (value, position) = self.txn.with_tree(|tree| {
            tree.setup_stack_for_relative_position(key, position)?;
            let value = op(tree)?;
            Ok((value, tree.relative_position()?))
        })?;
        self.position = position;
        Ok(value)
    }

    /// `None` at the end of the value.
    pub fn read_u8(&mut self) -> Result<Option<u8>, TransactionError> {
        self.run(TreeStack::read_u8)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), TransactionError> {
        self.run(|tree| tree.write_u8(value))
    }

    /// Read into `dst`, returning how many bytes were available.
    pub fn copy_to_buffer(&mut self, dst: &mut [u8]) -> Result<usize, TransactionError> {
        self.run(|tree| tree.read_buffer(dst))
    }

    /// Write all of `src` at the cursor.
    pub fn copy_from_buffer(&mut self, src: &[u8]) -> Result<usize, TransactionError> {
        self.run(|tree| tree.write_buffer(src))
    }

    pub fn read_string(&mut self, options: ReadStringOptions) -> Result<String, TransactionError> {
        match options.encoding {
            StringEncoding::Utf8 => {
                self.run(|tree| tree.read_string(options.max_chars, options.zero_terminated))
            }
        }
    }

    pub fn write_string(&mut self, s: &str) -> Result<usize, TransactionError> {
        self.run(|tree| tree.write_string(s, false))
    }

    /// Write `s` followed by a zero byte.
    pub fn write_string_terminated(&mut self, s: &str) -> Result<usize, TransactionError> {
        self.run(|tree| tree.write_string(s, true))
    }
}
