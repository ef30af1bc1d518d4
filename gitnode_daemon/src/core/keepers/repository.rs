use std::sync::Arc;

use async_trait::async_trait;
use gitnode_common::repository::Repository;
use gitnode_common::serializer::Serializer;
use serde::{Deserialize, Serialize};

use crate::core::error::NodeError;
use crate::core::schema::{
    repo_created_by_key, repo_created_by_prefix, repo_key, repo_proposal_closed_key,
    repo_proposal_end_height_key, repo_proposal_end_height_prefix, repo_proposal_vote_key,
};
use crate::core::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub choice: VoteChoice,
    pub weight: u64,
}

/// `Get(name, height?)` reads the repo and populates each proposal's
/// `config` from the governance config of the repository *as it existed at
/// the proposal's height* (spec.md §3, §4.3, §9 "Cyclic/backward
/// references"). `GetNoPopulate` skips this aggregate step.
#[async_trait]
pub trait RepositoryKeeper: Send + Sync {
    async fn get(&self, name: &str, height: u64) -> Result<Repository, NodeError>;
    async fn get_no_populate(&self, name: &str, height: u64) -> Result<Repository, NodeError>;
    async fn update(&self, name: &str, repo: Repository) -> Result<(), NodeError>;

    async fn set_proposal_vote(
        &self,
        repo: &str,
        proposal_id: &str,
        voter: &[u8],
        vote: Vote,
    ) -> Result<(), NodeError>;
    async fn get_proposal_vote(
        &self,
        repo: &str,
        proposal_id: &str,
        voter: &[u8],
    ) -> Result<Option<Vote>, NodeError>;

    async fn index_proposal_end_height(
        &self,
        repo: &str,
        proposal_id: &str,
        end_height: u64,
    ) -> Result<(), NodeError>;
    /// Ordered scan by end height, ascending.
    async fn iterate_proposals_by_end_height(
        &self,
        cb: &mut dyn FnMut(u64, &str, &str) -> bool,
    ) -> Result<(), NodeError>;

    async fn mark_proposal_closed(&self, repo: &str, proposal_id: &str) -> Result<(), NodeError>;
    async fn is_proposal_closed(&self, repo: &str, proposal_id: &str) -> Result<bool, NodeError>;

    async fn index_repo_created_by(&self, address: &[u8], repo: &str) -> Result<(), NodeError>;
    async fn iterate_repos_created_by(
        &self,
        address: &[u8],
        cb: &mut dyn FnMut(&str) -> bool,
    ) -> Result<(), NodeError>;
}

pub struct TreeRepositoryKeeper {
    storage: Arc<Storage>,
}

impl TreeRepositoryKeeper {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl RepositoryKeeper for TreeRepositoryKeeper {
    async fn get(&self, name: &str, height: u64) -> Result<Repository, NodeError> {
        let mut repo = self.get_no_populate(name, height).await?;
        let current_version = if height > 0 { height } else { self.storage.tree.version() };

        for proposal in &mut repo.proposals {
            if proposal.height > 0 && proposal.height < current_version {
                let historical = self.get_no_populate(name, proposal.height).await?;
                proposal.config = Some(historical.config);
            } else {
                proposal.config = Some(repo.config.clone());
            }
        }

        Ok(repo)
    }

    async fn get_no_populate(&self, name: &str, height: u64) -> Result<Repository, NodeError> {
        let key = repo_key(name);
        match self.storage.tree.get_at(&key, height) {
            None => Ok(Repository::bare()),
            Some(bytes) => Repository::from_bytes(&bytes)
                .map_err(|_| NodeError::Corruption { what: "repository", key: hex::encode(&key) }),
        }
    }

    async fn update(&self, name: &str, repo: Repository) -> Result<(), NodeError> {
        let key = repo_key(name);
        self.storage.tree.set(&key, &repo.to_bytes())?;
        Ok(())
    }

    async fn set_proposal_vote(
        &self,
        repo: &str,
        proposal_id: &str,
        voter: &[u8],
        vote: Vote,
    ) -> Result<(), NodeError> {
        let key = repo_proposal_vote_key(repo, proposal_id, voter);
        let mut tx = self.storage.kv.new_tx(true);
        tx.put(&key, &serde_json::to_vec(&vote).expect("vote serializes"))
            .map_err(|e| NodeError::Other(e.to_string()))?;
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn get_proposal_vote(
        &self,
        repo: &str,
        proposal_id: &str,
        voter: &[u8],
    ) -> Result<Option<Vote>, NodeError> {
        let key = repo_proposal_vote_key(repo, proposal_id, voter);
        let tx = self.storage.kv.new_tx(false);
        let value = tx.get(&key).map_err(|e| NodeError::Other(e.to_string()))?;
        value
            .map(|bytes| serde_json::from_slice(&bytes).map_err(|e| NodeError::Other(e.to_string())))
            .transpose()
    }

    async fn index_proposal_end_height(
        &self,
        repo: &str,
        proposal_id: &str,
        end_height: u64,
    ) -> Result<(), NodeError> {
        let key = repo_proposal_end_height_key(end_height, repo, proposal_id);
        let mut tx = self.storage.kv.new_tx(true);
        tx.put(&key, &[]).map_err(|e| NodeError::Other(e.to_string()))?;
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn iterate_proposals_by_end_height(
        &self,
        cb: &mut dyn FnMut(u64, &str, &str) -> bool,
    ) -> Result<(), NodeError> {
        let prefix = repo_proposal_end_height_prefix();
        let tx = self.storage.kv.new_tx(false);
        let mut stop = false;
        tx.iterate(&prefix, false, &mut |key, _| {
            if stop {
                return false;
            }
            let Some(rest) = key.strip_prefix(prefix.as_slice()) else {
                return true;
            };
            if rest.len() < 9 {
                return true;
            }
            let Some(end_height) = gitnode_common::serializer::read_uint64_be(&rest[..8]) else {
                return true;
            };
            let remainder = &rest[9..];
            let Some(sep) = remainder.iter().position(|b| *b == crate::core::schema::SEP) else {
                return true;
            };
            let repo = String::from_utf8_lossy(&remainder[..sep]).to_string();
            let proposal_id = String::from_utf8_lossy(&remainder[sep + 1..]).to_string();
            if !cb(end_height, &repo, &proposal_id) {
                stop = true;
                return false;
            }
            true
        })
        .map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn mark_proposal_closed(&self, repo: &str, proposal_id: &str) -> Result<(), NodeError> {
        let key = repo_proposal_closed_key(repo, proposal_id);
        let mut tx = self.storage.kv.new_tx(true);
        tx.put(&key, &[]).map_err(|e| NodeError::Other(e.to_string()))?;
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn is_proposal_closed(&self, repo: &str, proposal_id: &str) -> Result<bool, NodeError> {
        let key = repo_proposal_closed_key(repo, proposal_id);
        let tx = self.storage.kv.new_tx(false);
        Ok(tx.get(&key).map_err(|e| NodeError::Other(e.to_string()))?.is_some())
    }

    async fn index_repo_created_by(&self, address: &[u8], repo: &str) -> Result<(), NodeError> {
        let key = repo_created_by_key(address, repo);
        let mut tx = self.storage.kv.new_tx(true);
        tx.put(&key, &[]).map_err(|e| NodeError::Other(e.to_string()))?;
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn iterate_repos_created_by(
        &self,
        address: &[u8],
        cb: &mut dyn FnMut(&str) -> bool,
    ) -> Result<(), NodeError> {
        let prefix = repo_created_by_prefix(address);
        let tx = self.storage.kv.new_tx(false);
        tx.iterate(&prefix, false, &mut |key, _| {
            let Some(rest) = key.strip_prefix(prefix.as_slice()) else {
                return true;
            };
            let repo = String::from_utf8_lossy(rest).to_string();
            cb(&repo)
        })
        .map_err(|e| NodeError::Other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitnode_common::repository::{GovernanceConfig, Proposal, RepoConfig};

    #[tokio::test]
    async fn proposal_inherits_historical_config_at_its_height() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeRepositoryKeeper::new(storage);

        // height 1: quorum 10
        let mut repo = Repository::bare();
        repo.config.governance.quorum_percentage = 10;
        keeper.update("acme/repo", repo.clone()).await.unwrap();
        keeper.storage.tree.save_version().unwrap();

        // height 2: quorum changes to 50, and a proposal is introduced at height 1
        repo.config.governance.quorum_percentage = 50;
        repo.proposals.push(Proposal { id: "p1".into(), height: 1, ..Default::default() });
        keeper.update("acme/repo", repo.clone()).await.unwrap();
        keeper.storage.tree.save_version().unwrap();

        let populated = keeper.get("acme/repo", 0).await.unwrap();
        let proposal_config = populated.proposals[0].config.as_ref().unwrap();
        assert_eq!(proposal_config.governance.quorum_percentage, 10);
    }

    #[tokio::test]
    async fn proposal_introduced_at_current_version_inherits_current_config() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeRepositoryKeeper::new(storage);

        let mut repo = Repository::bare();
        repo.config.governance.quorum_percentage = 77;
        repo.proposals.push(Proposal { id: "p1".into(), height: 1, ..Default::default() });
        keeper.update("acme/repo", repo).await.unwrap();
        let (_, version) = keeper.storage.tree.save_version().unwrap();
        assert_eq!(version, 1);

        let populated = keeper.get("acme/repo", 0).await.unwrap();
        let proposal_config = populated.proposals[0].config.as_ref().unwrap();
        assert_eq!(proposal_config.governance.quorum_percentage, 77);
    }

    #[allow(dead_code)]
    fn _unused(_: GovernanceConfig, _: RepoConfig) {}
}
