use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DhtObjectType {
    Commit,
    Tag,
}

impl Serializer for DhtObjectType {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            DhtObjectType::Commit => 0,
            DhtObjectType::Tag => 1,
        });
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(DhtObjectType::Commit),
            1 => Ok(DhtObjectType::Tag),
            _ => Err(ReaderError::InvalidValue),
        }
    }
}

/// (objectKey, type, repoName, scheduledUnixTime). Keyed by (key,
/// scheduledTime) such that iteration returns entries ordered by soonest
/// scheduled time (spec.md §3, §9 "Announce-list key ordering").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhtAnnounceEntry {
    pub key: Hash,
    pub object_type: DhtObjectType,
    pub repo_name: String,
    pub scheduled_time: u64,
}

impl Serializer for DhtAnnounceEntry {
    fn write(&self, writer: &mut Writer) {
        self.key.write(writer);
        self.object_type.write(writer);
        writer.write_string(&self.repo_name);
        writer.write_u64(self.scheduled_time);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            key: Hash::read(reader)?,
            object_type: DhtObjectType::read(reader)?,
            repo_name: reader.read_string()?,
            scheduled_time: reader.read_u64()?,
        })
    }
}

/// The value stored at the announce-list key: everything but the key/time
/// already encoded in the key itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhtAnnounceValue {
    pub repo_name: String,
    pub object_type: DhtObjectType,
}

impl Serializer for DhtAnnounceValue {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.repo_name);
        self.object_type.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            repo_name: reader.read_string()?,
            object_type: DhtObjectType::read(reader)?,
        })
    }
}
