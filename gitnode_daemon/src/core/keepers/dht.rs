use std::sync::Arc;

use async_trait::async_trait;
use gitnode_common::crypto::{Hash, HASH_SIZE};
use gitnode_common::dht::{DhtAnnounceEntry, DhtAnnounceValue, DhtObjectType};
use gitnode_common::serializer::Serializer;

use crate::core::error::NodeError;
use crate::core::schema::{announce_list_key, announce_list_prefix, split_announce_list_key};
use crate::core::storage::Storage;

/// `AddToAnnounceList` first removes any existing entry with the same
/// object key, then writes the new one; `IterateAnnounceList` relies on
/// the key's fixed-width time prefix to yield soonest-first order for
/// free from a forward scan (spec.md §4.3, §9).
#[async_trait]
pub trait DhtKeeper: Send + Sync {
    async fn add_to_announce_list(
        &self,
        key: &Hash,
        repo: &str,
        object_type: DhtObjectType,
        scheduled_time: u64,
    ) -> Result<(), NodeError>;
    async fn remove_from_announce_list(&self, key: &Hash) -> Result<(), NodeError>;
    async fn iterate_announce_list(
        &self,
        cb: &mut dyn FnMut(DhtAnnounceEntry) -> bool,
    ) -> Result<(), NodeError>;
}

pub struct TreeDhtKeeper {
    storage: Arc<Storage>,
}

impl TreeDhtKeeper {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    fn matching_keys(&self, tx: &dyn crate::core::kv::KvTx, key: &Hash) -> Result<Vec<Vec<u8>>, NodeError> {
        let prefix = announce_list_prefix();
        let mut matches = Vec::new();
        tx.iterate(&prefix, false, &mut |k, _| {
            if let Some((_, obj_key)) = split_announce_list_key(k) {
                if obj_key.as_slice() == key.as_bytes().as_slice() {
                    matches.push(k.to_vec());
                }
            }
            true
        })
        .map_err(|e| NodeError::Other(e.to_string()))?;
        Ok(matches)
    }
}

#[async_trait]
impl DhtKeeper for TreeDhtKeeper {
    async fn add_to_announce_list(
        &self,
        key: &Hash,
        repo: &str,
        object_type: DhtObjectType,
        scheduled_time: u64,
    ) -> Result<(), NodeError> {
        let mut tx = self.storage.kv.new_tx(true);
        let existing = self.matching_keys(tx.as_ref(), key)?;
        for k in existing {
            tx.delete(&k).map_err(|e| NodeError::Other(e.to_string()))?;
        }

        let value = DhtAnnounceValue { repo_name: repo.to_string(), object_type };
        let new_key = announce_list_key(scheduled_time, key.as_bytes());
        tx.put(&new_key, &value.to_bytes()).map_err(|e| NodeError::Other(e.to_string()))?;
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn remove_from_announce_list(&self, key: &Hash) -> Result<(), NodeError> {
        let mut tx = self.storage.kv.new_tx(true);
        let existing = self.matching_keys(tx.as_ref(), key)?;
        for k in existing {
            tx.delete(&k).map_err(|e| NodeError::Other(e.to_string()))?;
        }
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn iterate_announce_list(
        &self,
        cb: &mut dyn FnMut(DhtAnnounceEntry) -> bool,
    ) -> Result<(), NodeError> {
        let prefix = announce_list_prefix();
        let tx = self.storage.kv.new_tx(false);
        let mut decode_err = None;
        tx.iterate(&prefix, false, &mut |k, v| {
            let Some((time, obj_key)) = split_announce_list_key(k) else {
                return true;
            };
            if obj_key.len() != HASH_SIZE {
                return true;
            }
            let mut arr = [0u8; HASH_SIZE];
            arr.copy_from_slice(&obj_key);

            match DhtAnnounceValue::from_bytes(v) {
                Ok(value) => cb(DhtAnnounceEntry {
                    key: Hash::new(arr),
                    object_type: value.object_type,
                    repo_name: value.repo_name,
                    scheduled_time: time,
                }),
                Err(_) => {
                    decode_err =
                        Some(NodeError::Corruption { what: "dht_announce_entry", key: hex::encode(k) });
                    false
                }
            }
        })
        .map_err(|e| NodeError::Other(e.to_string()))?;

        if let Some(err) = decode_err {
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_replaces_existing_entry_for_same_key() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeDhtKeeper::new(storage);
        let key = Hash::hash(b"commit-1");

        keeper.add_to_announce_list(&key, "acme/repo", DhtObjectType::Commit, 100).await.unwrap();
        keeper.add_to_announce_list(&key, "acme/repo", DhtObjectType::Commit, 50).await.unwrap();

        let mut seen = Vec::new();
        keeper
            .iterate_announce_list(&mut |entry| {
                seen.push(entry.scheduled_time);
                true
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![50]);
    }

    #[tokio::test]
    async fn iterate_yields_soonest_first() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeDhtKeeper::new(storage);
        let key_a = Hash::hash(b"a");
        let key_b = Hash::hash(b"b");

        keeper.add_to_announce_list(&key_a, "repo-a", DhtObjectType::Commit, 200).await.unwrap();
        keeper.add_to_announce_list(&key_b, "repo-b", DhtObjectType::Tag, 10).await.unwrap();

        let mut order = Vec::new();
        keeper
            .iterate_announce_list(&mut |entry| {
                order.push(entry.repo_name);
                true
            })
            .await
            .unwrap();
        assert_eq!(order, vec!["repo-b".to_string(), "repo-a".to_string()]);
    }

    #[tokio::test]
    async fn remove_deletes_all_matching_entries() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeDhtKeeper::new(storage);
        let key = Hash::hash(b"commit-1");
        keeper.add_to_announce_list(&key, "acme/repo", DhtObjectType::Commit, 100).await.unwrap();
        keeper.remove_from_announce_list(&key).await.unwrap();

        let mut seen = 0;
        keeper
            .iterate_announce_list(&mut |_| {
                seen += 1;
                true
            })
            .await
            .unwrap();
        assert_eq!(seen, 0);
    }
}
