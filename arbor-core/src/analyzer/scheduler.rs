//! Dependency-ordered folder scheduling.
//!
//! A folder becomes ready once every child folder has resolved. Ready folders
//! pop deepest first, ties by path, so a single worker visits folders in
//! depth-descending order while several workers can take independent subtrees.

use crate::inventory::SnapshotTree;
use crate::node::{depth, parent_path, NodeKind};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

pub struct FolderScheduler {
    ready: BinaryHeap<(usize, Reverse<String>)>,
    pending_children: HashMap<String, usize>,
    remaining: usize,
}

impl FolderScheduler {
    /// Schedule every non-root folder of `tree`.
    pub fn new(tree: &SnapshotTree) -> Self {
        let folders = tree.folders_deepest_first();
        let mut pending_children = HashMap::new();
        let mut ready = BinaryHeap::new();

        for folder in &folders {
            let child_folders = tree
                .children(folder)
                .iter()
                .filter(|c| tree.kind(c) == Some(NodeKind::Folder))
                .count();
            if child_folders == 0 {
                ready.push((depth(folder), Reverse(folder.clone())));
            } else {
                pending_children.insert(folder.clone(), child_folders);
            }
        }

        Self {
            ready,
            pending_children,
            remaining: folders.len(),
        }
    }

    /// Next folder whose children have all resolved
    pub fn next_ready(&mut self) -> Option<String> {
        self.ready.pop().map(|(_, Reverse(path))| path)
    }

    /// Mark `folder` resolved (summarized, reused or given up on).
    pub fn complete(&mut self, folder: &str) {
        self.remaining = self.remaining.saturating_sub(1);
        let Some(parent) = parent_path(folder).filter(|p| !p.is_empty()) else {
            return;
        };
        if let Some(count) = self.pending_children.get_mut(parent) {
            *count -= 1;
            if *count == 0 {
                self.pending_children.remove(parent);
                self.ready.push((depth(parent), Reverse(parent.to_string())));
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    pub fn total_remaining(&self) -> usize {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InventoryEntry;

    fn drain_sequential(tree: &SnapshotTree) -> Vec<String> {
        let mut scheduler = FolderScheduler::new(tree);
        let mut order = Vec::new();
        while let Some(folder) = scheduler.next_ready() {
            scheduler.complete(&folder);
            order.push(folder);
        }
        assert!(scheduler.is_done());
        order
    }

    #[test]
    fn single_chain_is_deepest_first() {
        let tree = SnapshotTree::from_inventory(&[
            InventoryEntry::folder("a"),
            InventoryEntry::folder("a/b"),
            InventoryEntry::file("a/b/c.txt", 1),
        ]);
        assert_eq!(drain_sequential(&tree), vec!["a/b", "a"]);
    }

    #[test]
    fn sequential_order_matches_depth_sort() {
        let tree = SnapshotTree::from_inventory(&[
            InventoryEntry::file("x/y/z/deep.rs", 1),
            InventoryEntry::file("a/b/one.rs", 1),
            InventoryEntry::file("a/two.rs", 1),
            InventoryEntry::file("c/three.rs", 1),
        ]);
        assert_eq!(drain_sequential(&tree), tree.folders_deepest_first());
    }

    #[test]
    fn parent_waits_for_all_children() {
        let tree = SnapshotTree::from_inventory(&[
            InventoryEntry::file("p/left/a.rs", 1),
            InventoryEntry::file("p/right/b.rs", 1),
        ]);
        let mut scheduler = FolderScheduler::new(&tree);
        let first = scheduler.next_ready().unwrap();
        let second = scheduler.next_ready().unwrap();
        assert_eq!((first.as_str(), second.as_str()), ("p/left", "p/right"));
        assert_eq!(scheduler.next_ready(), None);

        scheduler.complete(&first);
        assert_eq!(scheduler.next_ready(), None);
        scheduler.complete(&second);
        assert_eq!(scheduler.next_ready().as_deref(), Some("p"));
    }
}
