use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::crypto::Address;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

/// (owner, domains: mapping name -> target). Target strings may refer to
/// repository URIs, account URIs, or other namespaces (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub owner: Address,
    pub domains: IndexMap<String, String>,
}

impl Namespace {
    pub fn bare() -> Self {
        Self::default()
    }
}

impl Serializer for Namespace {
    fn write(&self, writer: &mut Writer) {
        self.owner.write(writer);
        writer.write_u32(self.domains.len() as u32);
        for (name, target) in &self.domains {
            writer.write_string(name);
            writer.write_string(target);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let owner = Address::read(reader)?;
        let count = reader.read_u32()?;
        let mut domains = IndexMap::with_capacity(count as usize);
        for _ in 0..count {
            let name = reader.read_string()?;
            let target = reader.read_string()?;
            domains.insert(name, target);
        }
        Ok(Self { owner, domains })
    }
}
