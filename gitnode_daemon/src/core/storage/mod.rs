//! The node's storage handle: the tree for versioned chain state plus the
//! kv store for indexes, composed once at boot and shared (via `Arc`) by
//! every keeper (spec.md §4.3).

use crate::core::kv::MemoryKv;
use crate::core::tree::{safe::SafeTree, MemoryTree};

pub struct Storage {
    pub tree: SafeTree<MemoryTree>,
    pub kv: MemoryKv,
}

impl Storage {
    pub fn new() -> Self {
        Self { tree: SafeTree::new(MemoryTree::new()), kv: MemoryKv::new() }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}
