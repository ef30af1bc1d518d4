//! The network DHT (spec.md §6, consumed): `NewAnnouncerSession`,
//! `RegisterChecker`. Distinct from [`crate::core::keepers::dht::DhtKeeper`],
//! which only owns the persisted announce-list schedule — this module is
//! the external provider the announcer session actually calls to push an
//! announcement onto the wire. The DHT implementation itself is an external
//! collaborator per spec.md §1; only the boundary trait lives here.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gitnode_common::crypto::Hash;
use gitnode_common::dht::DhtObjectType;

use crate::core::error::NodeError;

pub type Checker = Arc<dyn Fn(&str, &Hash) -> bool + Send + Sync>;

#[async_trait]
pub trait DhtProviderSession: Send + Sync {
    async fn announce(&self, object_type: DhtObjectType, repo_name: &str, key: &Hash) -> Result<(), NodeError>;
}

pub trait Dht: Send + Sync {
    fn new_announcer_session(&self) -> Box<dyn DhtProviderSession>;
    fn register_checker(&self, object_type: DhtObjectType, checker: Checker);
}

/// In-memory reference DHT: records every announce call and always
/// succeeds, unless `fail_keys` names the key. Used to exercise the
/// announcer session's retry and `OnDone` bookkeeping without a network.
#[derive(Default, Clone)]
pub struct RecordingDht {
    pub announced: Arc<Mutex<Vec<(DhtObjectType, String, Hash)>>>,
    pub fail_keys: Arc<Mutex<HashSet<Hash>>>,
}

impl RecordingDht {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, key: Hash) {
        self.fail_keys.lock().expect("dht lock poisoned").insert(key);
    }
}

struct RecordingSession {
    announced: Arc<Mutex<Vec<(DhtObjectType, String, Hash)>>>,
    fail_keys: Arc<Mutex<HashSet<Hash>>>,
}

#[async_trait]
impl DhtProviderSession for RecordingSession {
    async fn announce(&self, object_type: DhtObjectType, repo_name: &str, key: &Hash) -> Result<(), NodeError> {
        if self.fail_keys.lock().expect("dht lock poisoned").contains(key) {
            return Err(NodeError::Other(format!("dht announce failed for {key}")));
        }
        self.announced.lock().expect("dht lock poisoned").push((object_type, repo_name.to_string(), *key));
        Ok(())
    }
}

impl Dht for RecordingDht {
    fn new_announcer_session(&self) -> Box<dyn DhtProviderSession> {
        Box::new(RecordingSession { announced: self.announced.clone(), fail_keys: self.fail_keys.clone() })
    }

    fn register_checker(&self, _object_type: DhtObjectType, _checker: Checker) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn announce_records_the_call() {
        let dht = RecordingDht::new();
        let session = dht.new_announcer_session();
        let key = Hash::hash(b"commit-1");
        session.announce(DhtObjectType::Commit, "acme/repo", &key).await.unwrap();
        assert_eq!(dht.announced.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn announce_can_be_made_to_fail() {
        let dht = RecordingDht::new();
        let key = Hash::hash(b"commit-1");
        dht.fail(key);
        let session = dht.new_announcer_session();
        assert!(session.announce(DhtObjectType::Commit, "acme/repo", &key).await.is_err());
    }
}
