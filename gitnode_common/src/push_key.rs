use serde::{Deserialize, Serialize};

use crate::crypto::{Address, PublicKey};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

/// (pubKey, address, scopes, fee cap). Updating a push key also writes a
/// secondary address->keyID index in the kv store (spec.md §3, §4.3) — that
/// indexing is the keeper's job, not this value type's.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKey {
    pub pub_key: PublicKey,
    pub address: Address,
    pub scopes: Vec<String>,
    pub fee_cap: u64,
}

impl PushKey {
    pub fn bare() -> Self {
        Self::default()
    }
}

impl Serializer for PushKey {
    fn write(&self, writer: &mut Writer) {
        self.pub_key.write(writer);
        self.address.write(writer);
        writer.write_u32(self.scopes.len() as u32);
        for scope in &self.scopes {
            writer.write_string(scope);
        }
        writer.write_u64(self.fee_cap);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let pub_key = PublicKey::read(reader)?;
        let address = Address::read(reader)?;
        let count = reader.read_u32()?;
        let mut scopes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            scopes.push(reader.read_string()?);
        }
        let fee_cap = reader.read_u64()?;
        Ok(Self { pub_key, address, scopes, fee_cap })
    }
}
