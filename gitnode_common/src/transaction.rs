use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, PublicKey, Signature};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

/// A miner's proof-of-work submission: `(epoch, nonce)` (spec.md §4.5 "build
/// a `TxSubmitWork` transaction"). The core never re-verifies this payload
/// on the execution path — on-chain transaction execution rules are a
/// declared Non-goal (spec.md §1) — it only needs a stable shape to sign,
/// hash, and hand to the mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitWorkPayload {
    pub epoch: u64,
    pub nonce: u64,
}

impl Serializer for SubmitWorkPayload {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.epoch);
        writer.write_u64(self.nonce);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self { epoch: reader.read_u64()?, nonce: reader.read_u64()? })
    }
}

/// Transactions the core itself originates or indexes. `Generic` carries
/// the opaque bytes of any other transaction kind the chain's execution
/// layer understands but this node never interprets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionPayload {
    SubmitWork(SubmitWorkPayload),
    Generic(Vec<u8>),
}

impl Serializer for TransactionPayload {
    fn write(&self, writer: &mut Writer) {
        match self {
            TransactionPayload::SubmitWork(payload) => {
                writer.write_u8(0);
                payload.write(writer);
            }
            TransactionPayload::Generic(bytes) => {
                writer.write_u8(1);
                writer.write_sized_bytes(bytes);
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(TransactionPayload::SubmitWork(SubmitWorkPayload::read(reader)?)),
            1 => Ok(TransactionPayload::Generic(reader.read_sized_bytes()?)),
            _ => Err(ReaderError::InvalidValue),
        }
    }
}

/// A signed transaction as it flows into the mempool (spec.md §6 "Mempool
/// (consumed)"). The miner is the only in-core producer (`SubmitWork`); the
/// push handler indexes push-note-carrying transactions it only ever
/// treats as `Generic` bytes it forwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: PublicKey,
    pub nonce: u64,
    pub fee: u64,
    pub payload: TransactionPayload,
    pub signature: Signature,
}

impl Transaction {
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.sender.write(&mut writer);
        writer.write_u64(self.nonce);
        writer.write_u64(self.fee);
        self.payload.write(&mut writer);
        writer.bytes()
    }

    pub fn hash(&self) -> Hash {
        Hash::hash(&self.to_bytes())
    }
}

impl Serializer for Transaction {
    fn write(&self, writer: &mut Writer) {
        self.sender.write(writer);
        writer.write_u64(self.nonce);
        writer.write_u64(self.fee);
        self.payload.write(writer);
        self.signature.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            sender: PublicKey::read(reader)?,
            nonce: reader.read_u64()?,
            fee: reader.read_u64()?,
            payload: TransactionPayload::read(reader)?,
            signature: Signature::read(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_work_round_trips() {
        let tx = Transaction {
            sender: PublicKey::zero(),
            nonce: 1,
            fee: 0,
            payload: TransactionPayload::SubmitWork(SubmitWorkPayload { epoch: 3, nonce: 42 }),
            signature: Signature::zero(),
        };
        let bytes = tx.to_bytes();
        let decoded = Transaction::from_bytes(&bytes).unwrap();
        assert_eq!(tx, decoded);
    }
}
