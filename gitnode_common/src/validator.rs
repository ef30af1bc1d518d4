use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

/// A single validator's on-chain record. `pub_key` is reset to zero before
/// storage because the identity is already carried by the map key the
/// record lives under (spec.md §4.3 "Index").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub pub_key: PublicKey,
    pub stake: u64,
}

impl Serializer for ValidatorRecord {
    fn write(&self, writer: &mut Writer) {
        self.pub_key.write(writer);
        writer.write_u64(self.stake);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            pub_key: PublicKey::read(reader)?,
            stake: reader.read_u64()?,
        })
    }
}

/// Mapping public-key-bytes32 -> validator record, keyed by height in the
/// tree. Only written at the last height of an epoch (spec.md §3).
pub type ValidatorSet = IndexMap<PublicKey, ValidatorRecord>;

pub fn write_validator_set(set: &ValidatorSet, writer: &mut Writer) {
    writer.write_u32(set.len() as u32);
    for (key, record) in set {
        key.write(writer);
        record.write(writer);
    }
}

pub fn read_validator_set(reader: &mut Reader) -> Result<ValidatorSet, ReaderError> {
    let count = reader.read_u32()?;
    let mut set = IndexMap::with_capacity(count as usize);
    for _ in 0..count {
        let key = PublicKey::read(reader)?;
        let record = ValidatorRecord::read(reader)?;
        set.insert(key, record);
    }
    Ok(set)
}
