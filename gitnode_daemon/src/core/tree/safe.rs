//! Read/write lock over the authenticated tree: snapshots, rollback,
//! versioned lookup (spec.md §4.2). Reads may run concurrently; writes are
//! exclusive (spec.md §5).

use std::sync::RwLock;

use gitnode_common::crypto::Hash;

use super::AuthenticatedTree;
use crate::core::error::TreeError;

pub struct SafeTree<T: AuthenticatedTree> {
    inner: RwLock<T>,
}

impl<T: AuthenticatedTree> SafeTree<T> {
    pub fn new(tree: T) -> Self {
        Self { inner: RwLock::new(tree) }
    }

    pub fn get(&self, key: &[u8]) -> (u64, Option<Vec<u8>>) {
        self.inner.read().expect("tree lock poisoned").get(key)
    }

    pub fn get_versioned(&self, key: &[u8], version: u64) -> Option<Vec<u8>> {
        self.inner.read().expect("tree lock poisoned").get_versioned(key, version)
    }

    /// Convenience used throughout the keepers: version 0 means "latest",
    /// any positive height means "as of that saved version" (spec.md §3
    /// invariant "Accounts and repositories query for 'latest' when no
    /// height is given; for 'height h' when h>0").
    pub fn get_at(&self, key: &[u8], height: u64) -> Option<Vec<u8>> {
        if height > 0 {
            self.get_versioned(key, height)
        } else {
            self.get(key).1
        }
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<bool, TreeError> {
        self.inner.write().expect("tree lock poisoned").set(key, Some(value))
    }

    pub fn remove(&self, key: &[u8]) -> bool {
        self.inner.write().expect("tree lock poisoned").remove(key)
    }

    pub fn save_version(&self) -> Result<(Hash, u64), TreeError> {
        self.inner.write().expect("tree lock poisoned").save_version()
    }

    pub fn load(&self) -> Result<(), TreeError> {
        self.inner.write().expect("tree lock poisoned").load()
    }

    pub fn working_hash(&self) -> Hash {
        self.inner.read().expect("tree lock poisoned").working_hash()
    }

    pub fn hash(&self) -> Hash {
        self.inner.read().expect("tree lock poisoned").hash()
    }

    pub fn rollback(&self) {
        self.inner.write().expect("tree lock poisoned").rollback();
    }

    pub fn version(&self) -> u64 {
        self.inner.read().expect("tree lock poisoned").version()
    }

    pub fn iterate_prefix(&self, prefix: &[u8], reverse: bool, cb: &mut dyn FnMut(&[u8], &[u8]) -> bool) {
        self.inner.read().expect("tree lock poisoned").iterate_prefix(prefix, reverse, cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree::MemoryTree;

    #[test]
    fn get_at_height_zero_reads_latest() {
        let tree = SafeTree::new(MemoryTree::new());
        tree.set(b"a", b"1").unwrap();
        tree.save_version().unwrap();
        tree.set(b"a", b"2").unwrap();
        assert_eq!(tree.get_at(b"a", 0), Some(b"2".to_vec()));
        assert_eq!(tree.get_at(b"a", 1), Some(b"1".to_vec()));
    }
}
