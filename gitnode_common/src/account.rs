use serde::{Deserialize, Serialize};

use crate::serializer::{Reader, ReaderError, Serializer, Writer};

/// (nonce, balance, other fields). Materialized on demand: a query for an
/// address with no stored record returns `Account::bare()`, never an error
/// (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: u64,
    /// Opaque extension fields the chain's transaction layer reads but the
    /// core never interprets (spec.md §1 Non-goals: execution rules).
    pub extra: Vec<u8>,
}

impl Account {
    pub fn bare() -> Self {
        Self::default()
    }
}

impl Serializer for Account {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.nonce);
        writer.write_u64(self.balance);
        writer.write_sized_bytes(&self.extra);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            nonce: reader.read_u64()?,
            balance: reader.read_u64()?,
            extra: reader.read_sized_bytes()?,
        })
    }
}
