//! The auxiliary key/value index (spec.md §6 "Key/value store (consumed)").
//! The authenticated tree holds versioned chain state; the kv store holds
//! secondary indexes and data that never needs a Merkle proof (address->key
//! indexes, announce schedules, last-sync heights). It is out of scope as an
//! external collaborator (spec.md §1) beyond this trait boundary, so only a
//! trait plus an in-memory reference implementation live here.

mod memory;

pub use memory::MemoryKv;

use crate::core::error::KvError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A read/write transaction handle. The caller is expected to call
/// `commit()` explicitly; dropping without committing discards the writes
/// (spec.md §5 "Shared-resource policy").
pub trait KvTx: Send {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    fn delete(&mut self, key: &[u8]) -> Result<bool, KvError>;

    /// Iterates all records whose key starts with `prefix`, in ascending
    /// byte order unless `reverse` is set, invoking `cb(key, value)` for
    /// each until it returns `false`.
    fn iterate(
        &self,
        prefix: &[u8],
        reverse: bool,
        cb: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), KvError>;

    fn commit(self: Box<Self>) -> Result<(), KvError>;
}

pub trait KvStore: Send + Sync {
    fn new_tx(&self, writable: bool) -> Box<dyn KvTx + '_>;
}
