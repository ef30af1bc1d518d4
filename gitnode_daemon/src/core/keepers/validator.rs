use std::sync::Arc;

use async_trait::async_trait;
use gitnode_common::crypto::PublicKey;
use gitnode_common::serializer::{read_uint64_be, Serializer};
use gitnode_common::validator::{read_validator_set, write_validator_set, ValidatorSet};

use crate::core::epoch::last_height_in_epoch_of;
use crate::core::error::NodeError;
use crate::core::schema::{validators_key, validators_prefix};
use crate::core::storage::Storage;
use gitnode_common::serializer::{Reader, Writer};

fn encode_set(set: &ValidatorSet) -> Vec<u8> {
    let mut writer = Writer::new();
    write_validator_set(set, &mut writer);
    writer.bytes()
}

fn decode_set(bytes: &[u8]) -> Result<ValidatorSet, gitnode_common::serializer::ReaderError> {
    let mut reader = Reader::new(bytes);
    read_validator_set(&mut reader)
}

/// `Index(height, validators)` resets each record's public-key field before
/// storing (the map key already carries identity). `Get(height)` backward
/// scans one epoch at a time until it finds a stored set, snapping to
/// height 1 once before giving up (spec.md §4.3, §8).
#[async_trait]
pub trait ValidatorKeeper: Send + Sync {
    async fn index(&self, height: u64, validators: ValidatorSet) -> Result<(), NodeError>;
    async fn get(&self, height: u64) -> Result<ValidatorSet, NodeError>;
}

pub struct TreeValidatorKeeper {
    storage: Arc<Storage>,
    blocks_per_epoch: u64,
}

impl TreeValidatorKeeper {
    pub fn new(storage: Arc<Storage>, blocks_per_epoch: u64) -> Self {
        Self { storage, blocks_per_epoch }
    }

    fn read_at(&self, height: u64) -> Result<Option<ValidatorSet>, NodeError> {
        let key = validators_key(height);
        match self.storage.tree.get_at(&key, 0) {
            None => Ok(None),
            Some(bytes) => decode_set(&bytes)
                .map(Some)
                .map_err(|_| NodeError::Corruption { what: "validator_set", key: hex::encode(&key) }),
        }
    }

    fn latest_by_descending_scan(&self) -> Result<ValidatorSet, NodeError> {
        let prefix = validators_prefix();
        let mut found: Option<Vec<u8>> = None;
        self.storage.tree.iterate_prefix(&prefix, true, &mut |_, value| {
            found = Some(value.to_vec());
            false
        });
        match found {
            None => Ok(ValidatorSet::new()),
            Some(bytes) => decode_set(&bytes).map_err(|_| NodeError::Corruption {
                what: "validator_set",
                key: hex::encode(&prefix),
            }),
        }
    }
}

#[async_trait]
impl ValidatorKeeper for TreeValidatorKeeper {
    async fn index(&self, height: u64, mut validators: ValidatorSet) -> Result<(), NodeError> {
        for record in validators.values_mut() {
            record.pub_key = PublicKey::zero();
        }
        let key = validators_key(height);
        self.storage.tree.set(&key, &encode_set(&validators))?;
        Ok(())
    }

    async fn get(&self, height: u64) -> Result<ValidatorSet, NodeError> {
        if height == 0 {
            return self.latest_by_descending_scan();
        }

        let mut epoch_end = last_height_in_epoch_of(height, self.blocks_per_epoch);
        let mut tried_one = false;
        loop {
            if epoch_end >= 1 {
                if let Some(set) = self.read_at(epoch_end)? {
                    return Ok(set);
                }
            }
            if tried_one {
                return Ok(ValidatorSet::new());
            }
            if epoch_end <= self.blocks_per_epoch {
                epoch_end = 1;
                tried_one = true;
            } else {
                epoch_end -= self.blocks_per_epoch;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitnode_common::validator::ValidatorRecord;

    fn set_with_stake(stake: u64) -> ValidatorSet {
        let mut set = ValidatorSet::new();
        set.insert(PublicKey::zero(), ValidatorRecord { pub_key: PublicKey::zero(), stake });
        set
    }

    #[tokio::test]
    async fn one_set_at_height_one_is_returned_directly() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeValidatorKeeper::new(storage, 120);
        keeper.index(1, set_with_stake(10)).await.unwrap();
        let set = keeper.get(1).await.unwrap();
        assert_eq!(set.values().next().unwrap().stake, 10);
    }

    #[tokio::test]
    async fn get_zero_returns_most_recent() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeValidatorKeeper::new(storage.clone(), 120);
        keeper.index(1, set_with_stake(1)).await.unwrap();
        storage.tree.save_version().unwrap();
        keeper.index(2, set_with_stake(2)).await.unwrap();
        storage.tree.save_version().unwrap();

        let set = keeper.get(0).await.unwrap();
        assert_eq!(set.values().next().unwrap().stake, 2);
    }

    #[tokio::test]
    async fn backward_scan_by_epoch_finds_sparse_history() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeValidatorKeeper::new(storage, 2);
        keeper.index(2, set_with_stake(20)).await.unwrap();
        keeper.index(4, set_with_stake(40)).await.unwrap();

        let set9 = keeper.get(9).await.unwrap();
        assert_eq!(set9.values().next().unwrap().stake, 40);
        let set10 = keeper.get(10).await.unwrap();
        assert_eq!(set10.values().next().unwrap().stake, 40);
    }

    #[tokio::test]
    async fn index_resets_pub_key_field_in_record() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeValidatorKeeper::new(storage, 120);
        let key = PublicKey::from_bytes([7u8; 32]);
        let mut set = ValidatorSet::new();
        set.insert(key, ValidatorRecord { pub_key: key, stake: 5 });
        keeper.index(1, set).await.unwrap();

        let stored = keeper.get(1).await.unwrap();
        assert_eq!(stored.get(&key).unwrap().pub_key, PublicKey::zero());
    }
}
