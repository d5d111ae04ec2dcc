//! Creating the empty tree.

use crate::storage::{Addr, NodeKind, NodeStore};
use crate::tree::branch::{self, SplitRecord};
use crate::tree::key::FAR_LEFT_KEY;
use crate::tree::tree_stack::TreeError;

/// Build the empty tree in `store` and return its (in-memory) root.
///
/// The empty tree is one branch holding two one-byte sparse leaves: the
/// far-left sentinel (bounded by `FAR_LEFT_KEY`) and the far-right sentinel.
/// Every real key sorts strictly between them, so every seek lands on a
/// leaf.
pub fn create_empty_tree(store: &mut NodeStore) -> Result<Addr, TreeError> {
    let sentinel = Addr::Sparse { size: 1 };
    let root = store.create_empty_data_buffer(NodeKind::Branch);
    branch::write_two_children(
        store.buffer_mut(root)?,
        &SplitRecord {
            left: sentinel,
            left_size: 1,
            key: FAR_LEFT_KEY,
            right: sentinel,
            right_size: 1,
        },
    )?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::HeapStore;
    use crate::tree::diagnostics::check_integrity;
    use crate::tree::key::SENTINEL_BYTES;

    #[test]
    fn test_empty_tree_shape() {
        let mut store = NodeStore::new(Arc::new(HeapStore::new()));
        let root = create_empty_tree(&mut store).unwrap();
        assert!(root.is_branch() && root.is_in_memory());

        let report = check_integrity(&mut store, root).unwrap();
        assert_eq!(report.tree_size, SENTINEL_BYTES);
        assert_eq!(report.data_size, 0);
        assert_eq!(report.leaf_count, 2);
        assert_eq!(report.branch_count, 1);
    }
}
