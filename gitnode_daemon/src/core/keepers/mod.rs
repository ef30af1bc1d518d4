//! One keeper per entity kind, each composing the tree and/or kv store
//! (spec.md §4.3). Keepers are replaceable through small interfaces so the
//! push handler's collaborators can be mocked (spec.md §9 "Dynamic
//! dispatch"); [`Keepers`] composes them via a single aggregate, with
//! concrete tree-backed implementations constructed at boot.

pub mod account;
pub mod dht;
pub mod namespace;
pub mod push_key;
pub mod repository;
pub mod system;
pub mod tracked_repo;
pub mod tx;
pub mod validator;

use std::sync::Arc;

use self::account::{AccountKeeper, TreeAccountKeeper};
use self::dht::{DhtKeeper, TreeDhtKeeper};
use self::namespace::{NamespaceKeeper, TreeNamespaceKeeper};
use self::push_key::{PushKeyKeeper, TreePushKeyKeeper};
use self::repository::{RepositoryKeeper, TreeRepositoryKeeper};
use self::system::{SystemKeeper, TreeSystemKeeper};
use self::tracked_repo::{TrackedRepoKeeper, TreeTrackedRepoKeeper};
use self::tx::{TreeTxKeeper, TxKeeper};
use self::validator::{TreeValidatorKeeper, ValidatorKeeper};
use crate::core::storage::Storage;

/// The aggregate the push handler and miner depend on, never the concrete
/// tree-backed types directly (spec.md §9 "Dynamic dispatch").
#[derive(Clone)]
pub struct Keepers {
    pub account: Arc<dyn AccountKeeper>,
    pub repository: Arc<dyn RepositoryKeeper>,
    pub namespace: Arc<dyn NamespaceKeeper>,
    pub push_key: Arc<dyn PushKeyKeeper>,
    pub tracked_repo: Arc<dyn TrackedRepoKeeper>,
    pub tx: Arc<dyn TxKeeper>,
    pub dht: Arc<dyn DhtKeeper>,
    pub validator: Arc<dyn ValidatorKeeper>,
    pub system: Arc<dyn SystemKeeper>,
}

impl Keepers {
    /// Builds the tree-backed implementations used in production; tests
    /// that need a mock keeper construct `Keepers` by hand field-by-field.
    pub fn new_tree_backed(storage: Arc<Storage>, blocks_per_epoch: u64) -> Self {
        let namespace: Arc<dyn NamespaceKeeper> = Arc::new(TreeNamespaceKeeper::new(storage.clone()));
        Self {
            account: Arc::new(TreeAccountKeeper::new(storage.clone())),
            repository: Arc::new(TreeRepositoryKeeper::new(storage.clone())),
            push_key: Arc::new(TreePushKeyKeeper::new(storage.clone())),
            tracked_repo: Arc::new(TreeTrackedRepoKeeper::new(storage.clone(), namespace.clone())),
            tx: Arc::new(TreeTxKeeper::new(storage.clone())),
            dht: Arc::new(TreeDhtKeeper::new(storage.clone())),
            validator: Arc::new(TreeValidatorKeeper::new(storage.clone(), blocks_per_epoch)),
            system: Arc::new(TreeSystemKeeper::new(storage.clone(), blocks_per_epoch)),
            namespace,
        }
    }
}
