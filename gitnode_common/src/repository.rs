use serde::{Deserialize, Serialize};

use crate::crypto::Address;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

/// The governance subfield of a repository's config (spec.md §3). The core
/// only reads these knobs to answer "what policy applied at height H" for
/// proposal population; it never evaluates or enforces them (that is
/// on-chain transaction execution, a declared Non-goal).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    pub proposal_fee: u64,
    pub quorum_percentage: u8,
    pub veto_quorum_percentage: u8,
}

impl Serializer for GovernanceConfig {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.proposal_fee);
        writer.write_u8(self.quorum_percentage);
        writer.write_u8(self.veto_quorum_percentage);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            proposal_fee: reader.read_u64()?,
            quorum_percentage: reader.read_u8()?,
            veto_quorum_percentage: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub governance: GovernanceConfig,
}

impl Serializer for RepoConfig {
    fn write(&self, writer: &mut Writer) {
        self.governance.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self { governance: GovernanceConfig::read(reader)? })
    }
}

/// A repository proposal. `height` is when it was introduced; `config` is
/// filled in lazily by the repository keeper's aggregate `Get` (never
/// persisted — spec.md §9 "avoid caching proposal configs inside the
/// persisted repository bytes because they are historical snapshots").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub height: u64,
    pub end_height: u64,
    pub data: Vec<u8>,
    #[serde(skip)]
    pub config: Option<RepoConfig>,
}

impl Serializer for Proposal {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.id);
        writer.write_u64(self.height);
        writer.write_u64(self.end_height);
        writer.write_sized_bytes(&self.data);
        // config is a derived, point-in-time view and is never persisted.
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            id: reader.read_string()?,
            height: reader.read_u64()?,
            end_height: reader.read_u64()?,
            data: reader.read_sized_bytes()?,
            config: None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub owners: Vec<Address>,
    pub proposals: Vec<Proposal>,
    pub config: RepoConfig,
}

impl Repository {
    pub fn bare() -> Self {
        Self::default()
    }
}

impl Serializer for Repository {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.owners.len() as u32);
        for owner in &self.owners {
            owner.write(writer);
        }
        writer.write_u32(self.proposals.len() as u32);
        for proposal in &self.proposals {
            proposal.write(writer);
        }
        self.config.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let owner_count = reader.read_u32()?;
        let mut owners = Vec::with_capacity(owner_count as usize);
        for _ in 0..owner_count {
            owners.push(Address::read(reader)?);
        }

        let proposal_count = reader.read_u32()?;
        let mut proposals = Vec::with_capacity(proposal_count as usize);
        for _ in 0..proposal_count {
            proposals.push(Proposal::read(reader)?);
        }

        let config = RepoConfig::read(reader)?;

        Ok(Self { owners, proposals, config })
    }
}
