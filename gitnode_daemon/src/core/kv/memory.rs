use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::{KvStore, KvTx};
use crate::core::error::KvError;

/// In-memory reference implementation of [`KvStore`], analogous to the
/// teacher's `MemoryStorage` test backend: correct and simple, never meant
/// to be the production kv engine (that engine is an external collaborator
/// per spec.md §1).
#[derive(Default)]
pub struct MemoryKv {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn new_tx(&self, writable: bool) -> Box<dyn KvTx + '_> {
        let snapshot = self.data.read().expect("kv lock poisoned").clone();
        Box::new(MemoryTx {
            shared: &self.data,
            local: snapshot,
            writable,
        })
    }
}

struct MemoryTx<'a> {
    shared: &'a Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    local: BTreeMap<Vec<u8>, Vec<u8>>,
    writable: bool,
}

impl<'a> KvTx for MemoryTx<'a> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.local.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        if !self.writable {
            return Err(KvError::Io("transaction is read-only".to_string()));
        }
        self.local.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool, KvError> {
        if !self.writable {
            return Err(KvError::Io("transaction is read-only".to_string()));
        }
        Ok(self.local.remove(key).is_some())
    }

    fn iterate(
        &self,
        prefix: &[u8],
        reverse: bool,
        cb: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), KvError> {
        let matches: Vec<(&Vec<u8>, &Vec<u8>)> = self
            .local
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .collect();

        if reverse {
            for (k, v) in matches.into_iter().rev() {
                if !cb(k, v) {
                    break;
                }
            }
        } else {
            for (k, v) in matches {
                if !cb(k, v) {
                    break;
                }
            }
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), KvError> {
        if self.writable {
            *self.shared.write().expect("kv lock poisoned") = self.local;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_within_committed_tx() {
        let kv = MemoryKv::new();
        let mut tx = kv.new_tx(true);
        tx.put(b"a", b"1").unwrap();
        tx.commit().unwrap();

        let tx = kv.new_tx(false);
        assert_eq!(tx.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn iterate_is_prefix_ordered_ascending() {
        let kv = MemoryKv::new();
        let mut tx = kv.new_tx(true);
        tx.put(b"p:2", b"b").unwrap();
        tx.put(b"p:1", b"a").unwrap();
        tx.put(b"q:1", b"x").unwrap();
        tx.commit().unwrap();

        let tx = kv.new_tx(false);
        let mut seen = Vec::new();
        tx.iterate(b"p:", false, &mut |k, _| {
            seen.push(k.to_vec());
            true
        })
        .unwrap();
        assert_eq!(seen, vec![b"p:1".to_vec(), b"p:2".to_vec()]);
    }
}
