use std::sync::Arc;

use async_trait::async_trait;
use gitnode_common::crypto::Hash;
use gitnode_common::namespace::Namespace;
use gitnode_common::serializer::Serializer;

use crate::core::error::NodeError;
use crate::core::schema::namespace_key;
use crate::core::storage::Storage;

fn hash_namespace_name(name: &str) -> Hash {
    Hash::hash(name.as_bytes())
}

/// `Get(name, height?)` reads by the blake3 hash of the raw namespace
/// string (spec.md §4.3). `GetTarget(path, height?)` splits `path` into
/// `(namespace, domain)` at the first `/` and resolves the domain's target.
#[async_trait]
pub trait NamespaceKeeper: Send + Sync {
    async fn get(&self, name: &str, height: u64) -> Result<Namespace, NodeError>;
    async fn update(&self, name: &str, namespace: Namespace) -> Result<(), NodeError>;
    async fn get_target(&self, path: &str, height: u64) -> Result<String, NodeError>;
    /// Whether a namespace entry is actually present, as opposed to `get`'s
    /// "materialize a bare value on demand" semantics.
    async fn exists(&self, name: &str, height: u64) -> Result<bool, NodeError>;
}

pub struct TreeNamespaceKeeper {
    storage: Arc<Storage>,
}

impl TreeNamespaceKeeper {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl NamespaceKeeper for TreeNamespaceKeeper {
    async fn get(&self, name: &str, height: u64) -> Result<Namespace, NodeError> {
        let key = namespace_key(hash_namespace_name(name).as_bytes());
        match self.storage.tree.get_at(&key, height) {
            None => Ok(Namespace::bare()),
            Some(bytes) => Namespace::from_bytes(&bytes).map_err(|_| NodeError::Corruption {
                what: "namespace",
                key: hex::encode(&key),
            }),
        }
    }

    async fn update(&self, name: &str, namespace: Namespace) -> Result<(), NodeError> {
        let key = namespace_key(hash_namespace_name(name).as_bytes());
        self.storage.tree.set(&key, &namespace.to_bytes())?;
        Ok(())
    }

    async fn get_target(&self, path: &str, height: u64) -> Result<String, NodeError> {
        let Some(slash) = path.find('/') else {
            return Err(NodeError::InvalidAddressFormat);
        };
        let (name, domain) = (&path[..slash], &path[slash + 1..]);
        if name.is_empty() {
            return Err(NodeError::InvalidAddressFormat);
        }

        let key = namespace_key(hash_namespace_name(name).as_bytes());
        let namespace = match self.storage.tree.get_at(&key, height) {
            None => return Err(NodeError::NamespaceNotFound),
            Some(bytes) => Namespace::from_bytes(&bytes).map_err(|_| NodeError::Corruption {
                what: "namespace",
                key: hex::encode(&key),
            })?,
        };

        namespace.domains.get(domain).cloned().ok_or(NodeError::DomainNotFound)
    }

    async fn exists(&self, name: &str, height: u64) -> Result<bool, NodeError> {
        let key = namespace_key(hash_namespace_name(name).as_bytes());
        Ok(self.storage.tree.get_at(&key, height).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitnode_common::crypto::Address;

    #[tokio::test]
    async fn unknown_namespace_is_bare() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeNamespaceKeeper::new(storage);
        assert_eq!(keeper.get("ns1", 0).await.unwrap(), Namespace::bare());
    }

    #[tokio::test]
    async fn get_target_resolves_domain() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeNamespaceKeeper::new(storage);

        let mut ns = Namespace::bare();
        ns.owner = Address::zero();
        ns.domains.insert("d1".into(), "r/abc".into());
        keeper.update("ns1", ns).await.unwrap();

        assert_eq!(keeper.get_target("ns1/d1", 0).await.unwrap(), "r/abc");
    }

    #[tokio::test]
    async fn get_target_unknown_namespace_errors() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeNamespaceKeeper::new(storage);
        let err = keeper.get_target("unknown/domain", 0).await.unwrap_err();
        assert!(matches!(err, NodeError::NamespaceNotFound));
    }

    #[tokio::test]
    async fn get_target_unknown_domain_errors() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeNamespaceKeeper::new(storage);
        let mut ns = Namespace::bare();
        ns.domains.insert("d1".into(), "r/abc".into());
        keeper.update("ns1", ns).await.unwrap();

        let err = keeper.get_target("ns1/missing", 0).await.unwrap_err();
        assert!(matches!(err, NodeError::DomainNotFound));
    }

    #[tokio::test]
    async fn get_target_invalid_path_errors() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeNamespaceKeeper::new(storage);
        let err = keeper.get_target("no-slash-here", 0).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidAddressFormat));
    }
}
