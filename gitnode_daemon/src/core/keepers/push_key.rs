use std::sync::Arc;

use async_trait::async_trait;
use gitnode_common::push_key::PushKey;
use gitnode_common::serializer::Serializer;

use crate::core::error::NodeError;
use crate::core::schema::{push_key_address_index_key, push_key_address_index_prefix, push_key_key};
use crate::core::storage::Storage;

/// `Update(keyID, pushKey)` sets the tree entry and also writes an
/// empty-value index row `(address, keyID)` into the kv store;
/// `Remove(keyID)` removes the tree entry only, leaving the index row
/// behind (spec.md §4.3) — `GetByAddress` callers are expected to skip
/// key IDs that no longer resolve.
#[async_trait]
pub trait PushKeyKeeper: Send + Sync {
    async fn get(&self, key_id: &str, height: u64) -> Result<PushKey, NodeError>;
    async fn update(&self, key_id: &str, push_key: PushKey) -> Result<(), NodeError>;
    async fn remove(&self, key_id: &str) -> Result<(), NodeError>;
    async fn get_by_address(&self, address: &[u8]) -> Result<Vec<String>, NodeError>;
}

pub struct TreePushKeyKeeper {
    storage: Arc<Storage>,
}

impl TreePushKeyKeeper {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl PushKeyKeeper for TreePushKeyKeeper {
    async fn get(&self, key_id: &str, height: u64) -> Result<PushKey, NodeError> {
        let key = push_key_key(key_id);
        match self.storage.tree.get_at(&key, height) {
            None => Ok(PushKey::bare()),
            Some(bytes) => PushKey::from_bytes(&bytes).map_err(|_| NodeError::Corruption {
                what: "push_key",
                key: hex::encode(&key),
            }),
        }
    }

    async fn update(&self, key_id: &str, push_key: PushKey) -> Result<(), NodeError> {
        let key = push_key_key(key_id);
        self.storage.tree.set(&key, &push_key.to_bytes())?;

        let index_key = push_key_address_index_key(push_key.address.as_bytes(), key_id);
        let mut tx = self.storage.kv.new_tx(true);
        tx.put(&index_key, &[]).map_err(|e| NodeError::Other(e.to_string()))?;
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn remove(&self, key_id: &str) -> Result<(), NodeError> {
        let key = push_key_key(key_id);
        self.storage.tree.remove(&key);
        Ok(())
    }

    async fn get_by_address(&self, address: &[u8]) -> Result<Vec<String>, NodeError> {
        let prefix = push_key_address_index_prefix(address);
        let tx = self.storage.kv.new_tx(false);
        let mut key_ids = Vec::new();
        tx.iterate(&prefix, false, &mut |key, _| {
            if let Some(rest) = key.strip_prefix(prefix.as_slice()) {
                key_ids.push(String::from_utf8_lossy(rest).to_string());
            }
            true
        })
        .map_err(|e| NodeError::Other(e.to_string()))?;
        Ok(key_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitnode_common::crypto::Address;

    #[tokio::test]
    async fn unknown_push_key_is_bare() {
        let storage = Arc::new(Storage::new());
        let keeper = TreePushKeyKeeper::new(storage);
        assert_eq!(keeper.get("key1", 0).await.unwrap(), PushKey::bare());
    }

    #[tokio::test]
    async fn update_indexes_by_address_and_remove_drops_tree_entry_only() {
        let storage = Arc::new(Storage::new());
        let keeper = TreePushKeyKeeper::new(storage);

        let address = Address::from_hex("0000000000000000000000000000000000000003").unwrap();
        let push_key = PushKey { address, ..Default::default() };
        keeper.update("key1", push_key.clone()).await.unwrap();

        assert_eq!(keeper.get("key1", 0).await.unwrap(), push_key);
        assert_eq!(keeper.get_by_address(address.as_bytes()).await.unwrap(), vec!["key1".to_string()]);

        keeper.remove("key1").await.unwrap();
        assert_eq!(keeper.get("key1", 0).await.unwrap(), PushKey::bare());
        // the address index row is left behind by design.
        assert_eq!(keeper.get_by_address(address.as_bytes()).await.unwrap(), vec!["key1".to_string()]);
    }
}
