use serde::{Deserialize, Serialize};

use crate::serializer::{Reader, ReaderError, Serializer, Writer};

/// (updatedAt height). Keyed by repo name in the kv store (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRepo {
    pub updated_at: u64,
}

impl Serializer for TrackedRepo {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.updated_at);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self { updated_at: reader.read_u64()? })
    }
}
