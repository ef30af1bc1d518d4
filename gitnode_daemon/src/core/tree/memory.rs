use std::collections::BTreeMap;

use gitnode_common::crypto::Hash;

use super::AuthenticatedTree;
use crate::core::error::TreeError;

type Snapshot = BTreeMap<Vec<u8>, Vec<u8>>;

fn hash_snapshot(snapshot: &Snapshot) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for (k, v) in snapshot {
        hasher.update(&(k.len() as u64).to_be_bytes());
        hasher.update(k);
        hasher.update(&(v.len() as u64).to_be_bytes());
        hasher.update(v);
    }
    Hash::new(*hasher.finalize().as_bytes())
}

/// In-memory reference implementation of [`AuthenticatedTree`]: each
/// `save_version` snapshots the whole working map. Versions are 1-indexed
/// in the history vector (`history[0]` is version 1); version 0 always
/// means "no saved version yet" and is never stored.
pub struct MemoryTree {
    working: Snapshot,
    history: Vec<Snapshot>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self { working: BTreeMap::new(), history: Vec::new() }
    }

    fn committed(&self) -> Snapshot {
        self.history.last().cloned().unwrap_or_default()
    }
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthenticatedTree for MemoryTree {
    fn get(&self, key: &[u8]) -> (u64, Option<Vec<u8>>) {
        (0, self.working.get(key).cloned())
    }

    fn get_versioned(&self, key: &[u8], version: u64) -> Option<Vec<u8>> {
        if version == 0 || version as usize > self.history.len() {
            return None;
        }
        self.history[version as usize - 1].get(key).cloned()
    }

    fn set(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<bool, TreeError> {
        let Some(value) = value else {
            return Err(TreeError::NilValue);
        };
        let existed = self.working.insert(key.to_vec(), value.to_vec()).is_some();
        Ok(existed)
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        self.working.remove(key).is_some()
    }

    fn save_version(&mut self) -> Result<(Hash, u64), TreeError> {
        self.history.push(self.working.clone());
        let hash = hash_snapshot(&self.working);
        Ok((hash, self.history.len() as u64))
    }

    fn load(&mut self) -> Result<(), TreeError> {
        self.working = self.committed();
        Ok(())
    }

    fn working_hash(&self) -> Hash {
        hash_snapshot(&self.working)
    }

    fn hash(&self) -> Hash {
        self.history.last().map(hash_snapshot).unwrap_or_else(|| hash_snapshot(&BTreeMap::new()))
    }

    fn rollback(&mut self) {
        self.working = self.committed();
    }

    fn version(&self) -> u64 {
        self.history.len() as u64
    }

    fn iterate_prefix(&self, prefix: &[u8], reverse: bool, cb: &mut dyn FnMut(&[u8], &[u8]) -> bool) {
        let mut matches: Vec<(&Vec<u8>, &Vec<u8>)> =
            self.working.range(prefix.to_vec()..).take_while(|(k, _)| k.starts_with(prefix)).collect();
        if reverse {
            matches.reverse();
        }
        for (k, v) in matches {
            if !cb(k, v) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_starts_at_zero_and_increments() {
        let mut tree = MemoryTree::new();
        assert_eq!(tree.version(), 0);
        tree.set(b"a", Some(b"1")).unwrap();
        let (_, v1) = tree.save_version().unwrap();
        assert_eq!(v1, 1);
        tree.set(b"b", Some(b"2")).unwrap();
        let (_, v2) = tree.save_version().unwrap();
        assert_eq!(v2, 2);
        assert_eq!(tree.version(), 2);
    }

    #[test]
    fn set_nil_value_fails() {
        let mut tree = MemoryTree::new();
        assert_eq!(tree.set(b"a", None), Err(TreeError::NilValue));
    }

    #[test]
    fn get_versioned_unknown_version_is_none() {
        let mut tree = MemoryTree::new();
        tree.set(b"a", Some(b"1")).unwrap();
        tree.save_version().unwrap();
        assert_eq!(tree.get_versioned(b"a", 5), None);
        assert_eq!(tree.get_versioned(b"a", 1), Some(b"1".to_vec()));
    }

    #[test]
    fn rollback_discards_uncommitted_set() {
        let mut tree = MemoryTree::new();
        tree.set(b"a", Some(b"1")).unwrap();
        tree.save_version().unwrap();
        tree.set(b"a", Some(b"2")).unwrap();
        tree.rollback();
        assert_eq!(tree.get(b"a").1, Some(b"1".to_vec()));
    }
}
