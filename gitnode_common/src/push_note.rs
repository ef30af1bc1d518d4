use serde::{Deserialize, Serialize};

use crate::crypto::{Address, GitOid, Hash, PublicKey, Signature};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

/// (name, oldHash, newHash, nonce, mergeProposalID, fee, value, pushSig,
/// data) — one entry of a push note's pushed references (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushedReference {
    pub name: String,
    pub old_hash: GitOid,
    pub new_hash: GitOid,
    /// Next nonce for this reference; `current_ref_nonce + 1` when a note is
    /// freshly built (spec.md §4.8 "Note creation").
    pub nonce: u64,
    pub merge_proposal_id: Option<String>,
    pub fee: u64,
    pub value: u64,
    pub push_sig: Signature,
    pub data: Vec<u8>,
}

impl Serializer for PushedReference {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.name);
        writer.write_bytes(self.old_hash.as_bytes());
        writer.write_bytes(self.new_hash.as_bytes());
        writer.write_u64(self.nonce);
        writer.write_optional(&self.merge_proposal_id);
        writer.write_u64(self.fee);
        writer.write_u64(self.value);
        self.push_sig.write(writer);
        writer.write_sized_bytes(&self.data);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let name = reader.read_string()?;
        let old_hash = GitOid::new(reader.read_bytes(20)?.try_into().map_err(|_| ReaderError::InvalidValue)?);
        let new_hash = GitOid::new(reader.read_bytes(20)?.try_into().map_err(|_| ReaderError::InvalidValue)?);
        let nonce = reader.read_u64()?;
        let merge_proposal_id = reader.read_optional::<String>()?;
        let fee = reader.read_u64()?;
        let value = reader.read_u64()?;
        let push_sig = Signature::read(reader)?;
        let data = reader.read_sized_bytes()?;
        Ok(Self { name, old_hash, new_hash, nonce, merge_proposal_id, fee, value, push_sig, data })
    }
}

/// The signed, in-memory description of a git push (GLOSSARY). Carries a
/// list of pushed references and pusher metadata (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNote {
    pub repo_name: String,
    pub namespace: String,
    pub references: Vec<PushedReference>,
    pub pusher_key_id: String,
    pub pusher_address: Address,
    pub size: u64,
    pub timestamp: i64,
    pub pusher_account_nonce: u64,
    pub remote_node_signature: Signature,
    pub creator_public_key: PublicKey,
}

impl PushNote {
    /// Stable identifier used by the push pool's note-ID index and the
    /// recently-seen cache: blake3 of the note serialized with the
    /// remote-node signature zeroed out, matching the "signature over the
    /// serialized note (minus the signature field)" convention used to
    /// produce `remote_node_signature` itself (spec.md §4.8).
    pub fn id(&self) -> Hash {
        Hash::hash(&self.signing_bytes())
    }

    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_string(&self.repo_name);
        writer.write_string(&self.namespace);
        writer.write_u32(self.references.len() as u32);
        for reference in &self.references {
            reference.write(&mut writer);
        }
        writer.write_string(&self.pusher_key_id);
        self.pusher_address.write(&mut writer);
        writer.write_u64(self.size);
        writer.write_i64(self.timestamp);
        writer.write_u64(self.pusher_account_nonce);
        self.creator_public_key.write(&mut writer);
        writer.bytes()
    }

    /// Fee rate used for RBF ordering: total fee over the pushed-object size
    /// (spec.md §4.6, SPEC_FULL.md "Fee-rate").
    pub fn fee_rate(&self) -> f64 {
        let total_fee: u64 = self.references.iter().map(|r| r.fee).sum();
        if self.size == 0 {
            total_fee as f64
        } else {
            total_fee as f64 / self.size as f64
        }
    }

    pub fn total_fee(&self) -> u64 {
        self.references.iter().map(|r| r.fee).sum()
    }
}

impl Serializer for PushNote {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.repo_name);
        writer.write_string(&self.namespace);
        writer.write_u32(self.references.len() as u32);
        for reference in &self.references {
            reference.write(writer);
        }
        writer.write_string(&self.pusher_key_id);
        self.pusher_address.write(writer);
        writer.write_u64(self.size);
        writer.write_i64(self.timestamp);
        writer.write_u64(self.pusher_account_nonce);
        self.remote_node_signature.write(writer);
        self.creator_public_key.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let repo_name = reader.read_string()?;
        let namespace = reader.read_string()?;
        let ref_count = reader.read_u32()?;
        let mut references = Vec::with_capacity(ref_count as usize);
        for _ in 0..ref_count {
            references.push(PushedReference::read(reader)?);
        }
        let pusher_key_id = reader.read_string()?;
        let pusher_address = Address::read(reader)?;
        let size = reader.read_u64()?;
        let timestamp = reader.read_i64()?;
        let pusher_account_nonce = reader.read_u64()?;
        let remote_node_signature = Signature::read(reader)?;
        let creator_public_key = PublicKey::read(reader)?;
        Ok(Self {
            repo_name,
            namespace,
            references,
            pusher_key_id,
            pusher_address,
            size,
            timestamp,
            pusher_account_nonce,
            remote_node_signature,
            creator_public_key,
        })
    }
}
