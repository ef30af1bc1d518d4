use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

/// (height, appHash, hash, epochSeedOutput). Keyed by height (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub app_hash: Hash,
    pub hash: Hash,
    pub epoch_seed_output: Hash,
}

impl Serializer for BlockInfo {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.height);
        self.app_hash.write(writer);
        self.hash.write(writer);
        self.epoch_seed_output.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            height: reader.read_u64()?,
            app_hash: Hash::read(reader)?,
            hash: Hash::read(reader)?,
            epoch_seed_output: Hash::read(reader)?,
        })
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::zero()
    }
}
