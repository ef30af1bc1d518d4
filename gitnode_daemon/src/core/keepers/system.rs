use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use gitnode_common::block_info::BlockInfo;
use gitnode_common::serializer::{read_uint64_be, Reader, Serializer, Writer};

use crate::core::epoch::{epoch_of, first_in_epoch};
use crate::core::error::NodeError;
use crate::core::schema::{block_info_key, block_info_prefix, difficulty_key, pow_nonces_key};
use crate::core::storage::Storage;

fn encode_nonces(nonces: &[u64]) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.write_u32(nonces.len() as u32);
    for nonce in nonces {
        writer.write_u64(*nonce);
    }
    writer.bytes()
}

fn decode_nonces(bytes: &[u8]) -> Option<Vec<u64>> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_u32().ok()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(reader.read_u64().ok()?);
    }
    Some(out)
}

/// `SaveBlockInfo` writes to the tree and caches the value as `lastSaved`;
/// `GetLastBlockInfo` prefers that cache over scanning the tree (spec.md
/// §4.3). Proof-of-work nonce registration and the stored difficulty live
/// in the kv store: neither needs a historical/versioned lookup, only "the
/// current epoch's set" and "the current value" (resolved ambiguity
/// recorded in DESIGN.md, same rationale as tracked-repo entries).
#[async_trait]
pub trait SystemKeeper: Send + Sync {
    async fn save_block_info(&self, info: BlockInfo) -> Result<(), NodeError>;
    async fn get_last_block_info(&self) -> Result<BlockInfo, NodeError>;
    async fn get_block_info(&self, height: u64) -> Result<BlockInfo, NodeError>;
    async fn get_current_epoch(&self) -> Result<u64, NodeError>;
    async fn get_current_epoch_start_block(&self) -> Result<u64, NodeError>;
    async fn register_work_nonce(&self, epoch: u64, nonce: u64) -> Result<(), NodeError>;
    async fn is_work_nonce_registered(&self, epoch: u64, nonce: u64) -> Result<(), NodeError>;
    async fn get_current_difficulty(&self) -> Result<u64, NodeError>;
}

pub struct TreeSystemKeeper {
    storage: Arc<Storage>,
    blocks_per_epoch: u64,
    last_saved: RwLock<Option<BlockInfo>>,
}

impl TreeSystemKeeper {
    pub fn new(storage: Arc<Storage>, blocks_per_epoch: u64) -> Self {
        Self { storage, blocks_per_epoch, last_saved: RwLock::new(None) }
    }

    fn load_nonces(&self, epoch: u64) -> Result<Vec<u64>, NodeError> {
        let key = pow_nonces_key(epoch);
        let tx = self.storage.kv.new_tx(false);
        let value = tx.get(&key).map_err(|e| NodeError::Other(e.to_string()))?;
        Ok(value.and_then(|bytes| decode_nonces(&bytes)).unwrap_or_default())
    }
}

#[async_trait]
impl SystemKeeper for TreeSystemKeeper {
    async fn save_block_info(&self, info: BlockInfo) -> Result<(), NodeError> {
        let key = block_info_key(info.height);
        self.storage.tree.set(&key, &info.to_bytes())?;
        *self.last_saved.write().expect("system keeper lock poisoned") = Some(info);
        Ok(())
    }

    async fn get_last_block_info(&self) -> Result<BlockInfo, NodeError> {
        if let Some(cached) = self.last_saved.read().expect("system keeper lock poisoned").clone() {
            return Ok(cached);
        }

        let prefix = block_info_prefix();
        let mut found: Option<Vec<u8>> = None;
        self.storage.tree.iterate_prefix(&prefix, true, &mut |_, value| {
            found = Some(value.to_vec());
            false
        });
        match found {
            None => Ok(BlockInfo::default()),
            Some(bytes) => BlockInfo::from_bytes(&bytes)
                .map_err(|_| NodeError::Corruption { what: "block_info", key: hex::encode(&prefix) }),
        }
    }

    async fn get_block_info(&self, height: u64) -> Result<BlockInfo, NodeError> {
        let key = block_info_key(height);
        self.storage
            .tree
            .get_at(&key, 0)
            .ok_or(NodeError::ErrBlockInfoNotFound)
            .and_then(|bytes| {
                BlockInfo::from_bytes(&bytes)
                    .map_err(|_| NodeError::Corruption { what: "block_info", key: hex::encode(&key) })
            })
    }

    async fn get_current_epoch(&self) -> Result<u64, NodeError> {
        let last = self.get_last_block_info().await?;
        Ok(epoch_of(last.height, self.blocks_per_epoch))
    }

    async fn get_current_epoch_start_block(&self) -> Result<u64, NodeError> {
        let epoch = self.get_current_epoch().await?;
        Ok(first_in_epoch(epoch, self.blocks_per_epoch))
    }

    async fn register_work_nonce(&self, epoch: u64, nonce: u64) -> Result<(), NodeError> {
        let mut tx = self.storage.kv.new_tx(true);
        if epoch > 0 {
            tx.delete(&pow_nonces_key(epoch - 1)).map_err(|e| NodeError::Other(e.to_string()))?;
        }

        let mut nonces = self.load_nonces(epoch)?;
        if !nonces.contains(&nonce) {
            nonces.push(nonce);
        }
        tx.put(&pow_nonces_key(epoch), &encode_nonces(&nonces))
            .map_err(|e| NodeError::Other(e.to_string()))?;
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn is_work_nonce_registered(&self, epoch: u64, nonce: u64) -> Result<(), NodeError> {
        let nonces = self.load_nonces(epoch)?;
        if nonces.contains(&nonce) {
            Ok(())
        } else {
            Err(NodeError::ErrRecordNotFound)
        }
    }

    async fn get_current_difficulty(&self) -> Result<u64, NodeError> {
        let tx = self.storage.kv.new_tx(false);
        let value = tx.get(&difficulty_key()).map_err(|e| NodeError::Other(e.to_string()))?;
        Ok(value.and_then(|bytes| read_uint64_be(&bytes)).unwrap_or_else(gitnode_common::params::min_difficulty))
    }
}
