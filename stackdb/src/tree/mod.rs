//! The copy-on-write byte-stream tree.
//!
//! Keys are 128-bit values; each key maps to a byte stream of any length.
//! The streams of all keys are laid end to end, in key order, across the
//! leaves of a B-tree. Branches record, for each child, its address, the
//! number of leaf bytes beneath it, and the key that bounds it on the
//! right, so a byte offset or a key can both be found by one descent.
//!
//! # Structure
//!
//! - `key`: sentinel keys
//! - `branch`: branch record layout
//! - `stack`: the root-to-leaf path and cursor bookkeeping
//! - `seek`: descents by key and by absolute offset
//! - `insert`: copy-on-write and leaf insertion with branch splits
//! - `tree_stack`: the cursor API
//! - `bootstrap` / `diagnostics`: empty tree, integrity, dumps

pub mod bootstrap;
pub mod branch;
pub mod diagnostics;
mod insert;
pub mod key;
mod seek;
pub mod stack;
mod tree_stack;

pub use bootstrap::create_empty_tree;
pub use diagnostics::IntegrityReport;
pub use key::{FAR_LEFT_KEY, FAR_RIGHT_KEY, Key, SENTINEL_BYTES};
pub use stack::{PositionOrigin, StackEntry, StackState};
pub use tree_stack::{TreeError, TreeStack};
