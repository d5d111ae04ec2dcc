//! Integrity checking and debugging output.

use std::fmt::Write as _;

use crate::storage::{Addr, NodeStore, ReadableSpan};
use crate::tree::branch::{self, MAX_BRANCH_CHILDREN, MIN_BRANCH_CHILDREN};
use crate::tree::key::{FAR_LEFT_KEY, FAR_RIGHT_KEY, Key, SENTINEL_BYTES};
use crate::tree::tree_stack::TreeError;

/// Result of a successful integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Bytes in every leaf, sentinels included.
    pub tree_size: i64,
    /// Bytes stored under real keys.
    pub data_size: i64,
    pub branch_count: usize,
    pub leaf_count: usize,
    pub depth: usize,
}

struct Walk<'a> {
    store: &'a mut NodeStore,
    report: IntegrityReport,
}

impl Walk<'_> {
    fn node(&mut self, addr: Addr, left: Key, right: Key, depth: usize) -> Result<i64, TreeError> {
        self.report.depth = self.report.depth.max(depth);
        if addr.is_leaf() {
            self.report.leaf_count += 1;
            let size = self.store.get(addr)?.size();
            return i64::try_from(size).map_err(|_| TreeError::Corruption(format!("leaf {addr} is too large")));
        }

        self.report.branch_count += 1;
        let children = {
            let node = self.store.get(addr)?;
            branch::read_children(&node)?
        };
        // Only the root may drop below the minimum.
        if children.len() > MAX_BRANCH_CHILDREN || (depth > 1 && children.len() < MIN_BRANCH_CHILDREN) {
            return Err(TreeError::Corruption(format!(
                "branch {addr} has {} children",
                children.len()
            )));
        }

        let mut total = 0i64;
        let mut child_left = left;
        for (index, child) in children.iter().enumerate() {
            let child_right = branch::right_key_of(&children, index, right);
            if child_right < child_left || child_right > right {
                return Err(TreeError::Corruption(format!(
                    "child {index} of {addr} has key {child_right} outside [{child_left}, {right}]"
                )));
            }
            let actual = self.node(child.addr, child_left, child_right, depth + 1)?;
            if actual != child.size {
                return Err(TreeError::Corruption(format!(
                    "child {index} of {addr} records {} bytes but holds {actual}",
                    child.size
                )));
            }
            total += actual;
            child_left = child_right;
        }
        Ok(total)
    }
}

/// Walk the whole tree under `root`, verifying recorded sizes and key
/// bounds.
pub fn check_integrity(store: &mut NodeStore, root: Addr) -> Result<IntegrityReport, TreeError> {
    let mut walk = Walk {
        store,
        report: IntegrityReport {
            tree_size: 0,
            data_size: 0,
            branch_count: 0,
            leaf_count: 0,
            depth: 0,
        },
    };
    let tree_size = walk.node(root, FAR_LEFT_KEY, FAR_RIGHT_KEY, 1)?;
    let mut report = walk.report;
    report.tree_size = tree_size;
    report.data_size = tree_size - SENTINEL_BYTES;
    Ok(report)
}

/// Every in-memory node reachable from `root`: branches first in
/// depth-first pre-order, then leaves left to right.
pub fn collect_in_memory_addresses(store: &mut NodeStore, root: Addr) -> Result<Vec<Addr>, TreeError> {
    fn visit(
        store: &mut NodeStore,
        addr: Addr,
        branches: &mut Vec<Addr>,
        leaves: &mut Vec<Addr>,
    ) -> Result<(), TreeError> {
        branches.push(addr);
        let children = {
            let node = store.get(addr)?;
            branch::read_children(&node)?
        };
        for child in children.iter().filter(|c| c.addr.is_in_memory()) {
            if child.addr.is_branch() {
                visit(store, child.addr, branches, leaves)?;
            } else {
                leaves.push(child.addr);
            }
        }
        Ok(())
    }

    let mut branches = Vec::new();
    let mut leaves = Vec::new();
    if root.is_in_memory() {
        visit(store, root, &mut branches, &mut leaves)?;
    }
    branches.append(&mut leaves);
    Ok(branches)
}

/// Render every branch, one tree level per block.
pub fn dump_branches(store: &mut NodeStore, root: Addr) -> Result<String, TreeError> {
    let mut out = String::new();
    let mut level = vec![root];
    let mut depth = 0;
    while !level.is_empty() {
        let _ = writeln!(out, "level {depth}:");
        let mut next = Vec::new();
        for addr in level {
            let children = {
                let node = store.get(addr)?;
                branch::read_children(&node)?
            };
            let _ = write!(out, "  {addr}:");
            for child in &children {
                let _ = write!(out, " [{} {}", child.addr, child.size);
                if let Some(key) = child.key {
                    let _ = write!(out, " | {key}");
                }
                out.push(']');
                if child.addr.is_branch() {
                    next.push(child.addr);
                }
            }
            out.push('\n');
        }
        level = next;
        depth += 1;
    }
    Ok(out)
}
