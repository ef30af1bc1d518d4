//! The remote server the push handler is embedded in (spec.md §6 "Remote
//! server (consumed by push handler)"): it hands the handler its shared
//! collaborators (push pool, DHT, push-key getter, validator signing key,
//! policy enforcer, node config) and carries operations whose target is
//! network-wide (broadcasting a note, scheduling a resync, asking the
//! network to check a note). The remote server itself is an external
//! collaborator per spec.md §1; only the boundary trait and the types it
//! hands back live here.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use gitnode_common::crypto::{GitOid, KeyPair};
use gitnode_common::push_note::PushNote;

use crate::core::dht_client::Dht;
use crate::core::error::NodeError;
use crate::core::keepers::push_key::PushKeyKeeper;
use crate::core::policy::PolicyEnforcer;
use crate::core::push_pool::PushPool;

/// A repo's ref state as seen by the remote server for some requested
/// scope of references (spec.md §4.8 "Validate references" reads against
/// "the current state"; `GetRepoState(repo, scope...)` is how the push
/// handler would ask a remote peer for that same view of a repo it does
/// not hold locally).
#[derive(Debug, Clone, Default)]
pub struct RepoState {
    pub refs: BTreeMap<String, GitOid>,
}

/// Node-wide configuration the push handler consults (max repo size, max
/// push file size, etc. already live in `gitnode_common::params`; this
/// type is the `Cfg` handed back by the remote server so the handler never
/// reaches into process-global state directly).
#[derive(Debug, Clone, Copy)]
pub struct NodeCfg {
    pub max_repo_size: u64,
    pub max_push_file_size: u64,
}

/// The network-facing surface a push handler is embedded in.
#[async_trait]
pub trait RemoteServer: Send + Sync {
    async fn get_repo_state(&self, repo: &str, scope: &[String]) -> Result<RepoState, NodeError>;
    fn get_push_pool(&self) -> Arc<PushPool>;
    fn get_logic(&self) -> Arc<dyn PolicyEnforcer>;
    fn get_dht(&self) -> Arc<dyn Dht>;
    fn get_push_key_getter(&self) -> Arc<dyn PushKeyKeeper>;
    fn get_private_validator_key(&self) -> Arc<KeyPair>;
    /// Broadcasts the push note and this node's endorsement of it; only
    /// called once every announcement for the push has succeeded (spec.md
    /// §4.8 "Pool add and announce").
    async fn broadcast_note_and_endorsement(&self, note: &PushNote) -> Result<(), NodeError>;
    /// Schedules a resync for `reference` of the repo named by `note` after
    /// a reference-hash mismatch with local or network state (spec.md §4.8
    /// "Note creation" / `HandleRefMismatch`). `net_mismatch` distinguishes
    /// a mismatch against the network's view from one against local state.
    async fn try_schedule_resync(&self, note: &PushNote, reference: &str, net_mismatch: bool) -> Result<(), NodeError>;
    /// Validates a locally built note against the network's view before
    /// it is pooled (spec.md §4.8 "Note creation").
    async fn check_note(&self, note: &PushNote) -> Result<(), NodeError>;
    fn cfg(&self) -> NodeCfg;
}

/// In-process remote server: repo state is whatever was seeded into it,
/// note broadcasts/resyncs/checks are recorded rather than sent over a
/// network. Wires the push handler end to end in tests and for a
/// single-node deployment where there is no peer to broadcast to.
pub struct LocalRemoteServer {
    push_pool: Arc<PushPool>,
    logic: Arc<dyn PolicyEnforcer>,
    dht: Arc<dyn Dht>,
    push_key_getter: Arc<dyn PushKeyKeeper>,
    validator_key: Arc<KeyPair>,
    cfg: NodeCfg,
    repo_states: std::sync::Mutex<BTreeMap<String, RepoState>>,
    broadcasts: std::sync::Mutex<Vec<PushNote>>,
    resyncs: std::sync::Mutex<Vec<(String, String, bool)>>,
}

impl LocalRemoteServer {
    pub fn new(
        push_pool: Arc<PushPool>,
        logic: Arc<dyn PolicyEnforcer>,
        dht: Arc<dyn Dht>,
        push_key_getter: Arc<dyn PushKeyKeeper>,
        validator_key: KeyPair,
        cfg: NodeCfg,
    ) -> Self {
        Self {
            push_pool,
            logic,
            dht,
            push_key_getter,
            validator_key: Arc::new(validator_key),
            cfg,
            repo_states: std::sync::Mutex::new(BTreeMap::new()),
            broadcasts: std::sync::Mutex::new(Vec::new()),
            resyncs: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn seed_repo_state(&self, repo: &str, state: RepoState) {
        self.repo_states.lock().expect("remote server lock poisoned").insert(repo.to_string(), state);
    }

    pub fn broadcasts(&self) -> Vec<PushNote> {
        self.broadcasts.lock().expect("remote server lock poisoned").clone()
    }
}

#[async_trait]
impl RemoteServer for LocalRemoteServer {
    async fn get_repo_state(&self, repo: &str, scope: &[String]) -> Result<RepoState, NodeError> {
        let states = self.repo_states.lock().expect("remote server lock poisoned");
        let Some(full) = states.get(repo) else {
            return Ok(RepoState::default());
        };
        if scope.is_empty() {
            return Ok(full.clone());
        }
        let refs = full.refs.iter().filter(|(name, _)| scope.contains(name)).map(|(n, h)| (n.clone(), *h)).collect();
        Ok(RepoState { refs })
    }

    fn get_push_pool(&self) -> Arc<PushPool> {
        self.push_pool.clone()
    }

    fn get_logic(&self) -> Arc<dyn PolicyEnforcer> {
        self.logic.clone()
    }

    fn get_dht(&self) -> Arc<dyn Dht> {
        self.dht.clone()
    }

    fn get_push_key_getter(&self) -> Arc<dyn PushKeyKeeper> {
        self.push_key_getter.clone()
    }

    fn get_private_validator_key(&self) -> Arc<KeyPair> {
        self.validator_key.clone()
    }

    async fn broadcast_note_and_endorsement(&self, note: &PushNote) -> Result<(), NodeError> {
        self.broadcasts.lock().expect("remote server lock poisoned").push(note.clone());
        Ok(())
    }

    async fn try_schedule_resync(&self, note: &PushNote, reference: &str, net_mismatch: bool) -> Result<(), NodeError> {
        self.resyncs.lock().expect("remote server lock poisoned").push((note.repo_name.clone(), reference.to_string(), net_mismatch));
        Ok(())
    }

    async fn check_note(&self, _note: &PushNote) -> Result<(), NodeError> {
        Ok(())
    }

    fn cfg(&self) -> NodeCfg {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dht_client::RecordingDht;
    use crate::core::keepers::push_key::TreePushKeyKeeper;
    use crate::core::policy::PermissiveEnforcer;
    use crate::core::storage::Storage;
    use gitnode_common::crypto::KeyPair;
    use rand::rngs::OsRng;

    fn server() -> LocalRemoteServer {
        let storage = Arc::new(Storage::new());
        LocalRemoteServer::new(
            Arc::new(PushPool::with_default_capacity()),
            Arc::new(PermissiveEnforcer),
            Arc::new(RecordingDht::new()),
            Arc::new(TreePushKeyKeeper::new(storage)),
            KeyPair::generate(&mut OsRng),
            NodeCfg { max_repo_size: 1024, max_push_file_size: 512 },
        )
    }

    #[tokio::test]
    async fn repo_state_defaults_to_empty_when_unseeded() {
        let server = server();
        let state = server.get_repo_state("acme/repo", &[]).await.unwrap();
        assert!(state.refs.is_empty());
    }

    #[tokio::test]
    async fn repo_state_scope_filters_to_requested_refs() {
        let server = server();
        let mut refs = BTreeMap::new();
        refs.insert("refs/heads/main".to_string(), GitOid::new([1u8; 20]));
        refs.insert("refs/heads/dev".to_string(), GitOid::new([2u8; 20]));
        server.seed_repo_state("acme/repo", RepoState { refs });

        let scoped = server.get_repo_state("acme/repo", &["refs/heads/main".to_string()]).await.unwrap();
        assert_eq!(scoped.refs.len(), 1);
        assert!(scoped.refs.contains_key("refs/heads/main"));
    }
}
