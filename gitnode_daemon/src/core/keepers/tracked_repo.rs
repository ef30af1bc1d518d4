use std::sync::Arc;

use async_trait::async_trait;
use gitnode_common::serializer::{read_uint64_be, uint64_be, Serializer};
use gitnode_common::tracked_repo::TrackedRepo;

use super::namespace::NamespaceKeeper;
use crate::core::error::NodeError;
use crate::core::schema::{repo_ref_sync_height_key, tracked_repo_key, tracked_repo_prefix};
use crate::core::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
enum RepoTarget {
    Repo(String),
    Namespace { name: String, domain: Option<String> },
}

/// Splits `raw` around its first `/` into `(name, domain)`, the same
/// trailing-slash-before-domain convention `namespace.rs`'s `get_target`
/// uses — there is no `n/` scheme prefix; spec.md's own literal vocabulary
/// (`"ns1/"`, `"ns1/d2"`) has none either. A trailing slash with nothing
/// after it (domain == None) means "the whole namespace".
fn split_namespace_path(raw: &str) -> Option<(&str, Option<&str>)> {
    let slash = raw.find('/')?;
    let name = &raw[..slash];
    if name.is_empty() {
        return None;
    }
    let domain = &raw[slash + 1..];
    Some((name, if domain.is_empty() { None } else { Some(domain) }))
}

fn is_valid_repo_identifier(s: &str) -> bool {
    let mut parts = s.splitn(2, '/');
    let owner = parts.next().unwrap_or("");
    let Some(name) = parts.next() else { return false };
    let valid_segment = |seg: &str| {
        !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    };
    valid_segment(owner) && valid_segment(name)
}

/// A domain target is a "whole native repo URI" when it carries the `r/`
/// scheme prefix; `n/`- and `a/`-prefixed targets (nested namespaces,
/// account URIs) are skipped silently during whole-namespace tracking.
fn trackable_repo_name(domain_target: &str) -> Option<String> {
    domain_target.strip_prefix("r/").map(str::to_string)
}

#[async_trait]
pub trait TrackedRepoKeeper: Send + Sync {
    async fn track(&self, targets: &str, height: u64) -> Result<(), NodeError>;
    async fn untrack(&self, targets: &str) -> Result<(), NodeError>;
    async fn get_tracked(&self, name: &str) -> Result<Option<TrackedRepo>, NodeError>;
    async fn tracked(&self) -> Result<Vec<(String, TrackedRepo)>, NodeError>;
    async fn update_ref_last_sync_height(&self, repo: &str, reference: &str, height: u64) -> Result<(), NodeError>;
    async fn get_ref_last_sync_height(&self, repo: &str, reference: &str) -> Result<u64, NodeError>;
}

pub struct TreeTrackedRepoKeeper {
    storage: Arc<Storage>,
    namespaces: Arc<dyn NamespaceKeeper>,
}

impl TreeTrackedRepoKeeper {
    pub fn new(storage: Arc<Storage>, namespaces: Arc<dyn NamespaceKeeper>) -> Self {
        Self { storage, namespaces }
    }

    async fn resolve(&self, targets: &str) -> Result<Vec<String>, NodeError> {
        let mut repo_names = Vec::new();
        for raw in targets.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }

            // `name/domain` is syntactically identical to a bare repo
            // identifier; only route it through namespace dereference when
            // `name` is an existing namespace, else fall back to treating
            // the whole string as a repo identifier (resolved ambiguity,
            // DESIGN.md). A trailing slash with an empty domain can never
            // be a valid repo identifier (its final segment is empty), so
            // it is routed unconditionally.
            let target = match split_namespace_path(raw) {
                Some((name, None)) => RepoTarget::Namespace { name: name.to_string(), domain: None },
                Some((name, Some(domain))) if self.namespaces.exists(name, 0).await? => {
                    RepoTarget::Namespace { name: name.to_string(), domain: Some(domain.to_string()) }
                }
                _ => RepoTarget::Repo(raw.to_string()),
            };

            match target {
                RepoTarget::Repo(name) => {
                    if !is_valid_repo_identifier(&name) {
                        return Err(NodeError::InvalidRepoIdentifier(name));
                    }
                    repo_names.push(name);
                }
                RepoTarget::Namespace { name, domain } => {
                    if !self.namespaces.exists(&name, 0).await? {
                        return Err(NodeError::NamespaceNotFoundNamed(name));
                    }
                    let namespace = self.namespaces.get(&name, 0).await?;
                    match domain {
                        Some(d) => match namespace.domains.get(&d) {
                            None => return Err(NodeError::NamespaceDomainNotFound(d)),
                            Some(target) => {
                                if let Some(repo_name) = trackable_repo_name(target) {
                                    repo_names.push(repo_name);
                                }
                            }
                        },
                        None => {
                            for target in namespace.domains.values() {
                                if let Some(repo_name) = trackable_repo_name(target) {
                                    repo_names.push(repo_name);
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(repo_names)
    }
}

#[async_trait]
impl TrackedRepoKeeper for TreeTrackedRepoKeeper {
    async fn track(&self, targets: &str, height: u64) -> Result<(), NodeError> {
        let repo_names = self.resolve(targets).await?;
        let mut tx = self.storage.kv.new_tx(true);
        for name in repo_names {
            let record = TrackedRepo { updated_at: height };
            tx.put(&tracked_repo_key(&name), &record.to_bytes())
                .map_err(|e| NodeError::Other(e.to_string()))?;
        }
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn untrack(&self, targets: &str) -> Result<(), NodeError> {
        let repo_names = self.resolve(targets).await?;
        let mut tx = self.storage.kv.new_tx(true);
        for name in repo_names {
            tx.delete(&tracked_repo_key(&name)).map_err(|e| NodeError::Other(e.to_string()))?;
        }
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn get_tracked(&self, name: &str) -> Result<Option<TrackedRepo>, NodeError> {
        let key = tracked_repo_key(name);
        let tx = self.storage.kv.new_tx(false);
        let value = tx.get(&key).map_err(|e| NodeError::Other(e.to_string()))?;
        value
            .map(|bytes| {
                TrackedRepo::from_bytes(&bytes)
                    .map_err(|_| NodeError::Corruption { what: "tracked_repo", key: hex::encode(&key) })
            })
            .transpose()
    }

    async fn tracked(&self) -> Result<Vec<(String, TrackedRepo)>, NodeError> {
        let prefix = tracked_repo_prefix();
        let tx = self.storage.kv.new_tx(false);
        let mut out = Vec::new();
        let mut decode_err = None;
        tx.iterate(&prefix, false, &mut |key, value| {
            let Some(rest) = key.strip_prefix(prefix.as_slice()) else {
                return true;
            };
            let name = String::from_utf8_lossy(rest).to_string();
            match TrackedRepo::from_bytes(value) {
                Ok(record) => out.push((name, record)),
                Err(_) => {
                    decode_err = Some(NodeError::Corruption { what: "tracked_repo", key: hex::encode(key) });
                    return false;
                }
            }
            true
        })
        .map_err(|e| NodeError::Other(e.to_string()))?;
        if let Some(err) = decode_err {
            return Err(err);
        }
        Ok(out)
    }

    async fn update_ref_last_sync_height(&self, repo: &str, reference: &str, height: u64) -> Result<(), NodeError> {
        let key = repo_ref_sync_height_key(repo, reference);
        let mut tx = self.storage.kv.new_tx(true);
        tx.put(&key, &uint64_be(height)).map_err(|e| NodeError::Other(e.to_string()))?;
        tx.commit().map_err(|e| NodeError::Other(e.to_string()))
    }

    async fn get_ref_last_sync_height(&self, repo: &str, reference: &str) -> Result<u64, NodeError> {
        let key = repo_ref_sync_height_key(repo, reference);
        let tx = self.storage.kv.new_tx(false);
        let value = tx.get(&key).map_err(|e| NodeError::Other(e.to_string()))?;
        Ok(value.and_then(|bytes| read_uint64_be(&bytes)).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keepers::namespace::TreeNamespaceKeeper;
    use gitnode_common::namespace::Namespace;

    fn make_keeper() -> TreeTrackedRepoKeeper {
        let storage = Arc::new(Storage::new());
        let namespaces: Arc<dyn NamespaceKeeper> = Arc::new(TreeNamespaceKeeper::new(storage.clone()));
        TreeTrackedRepoKeeper::new(storage, namespaces)
    }

    #[tokio::test]
    async fn track_whole_namespace_writes_only_trackable_domains() {
        let keeper = make_keeper();
        let mut ns = Namespace::bare();
        ns.domains.insert("d1".into(), "r/abc".into());
        ns.domains.insert("d2".into(), "r/xyz".into());
        ns.domains.insert("d3".into(), "a/somebody".into());
        keeper.namespaces.update("ns1", ns).await.unwrap();

        keeper.track("ns1/", 0).await.unwrap();

        assert!(keeper.get_tracked("abc").await.unwrap().is_some());
        assert!(keeper.get_tracked("xyz").await.unwrap().is_some());
        assert!(keeper.get_tracked("somebody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn track_single_domain_writes_only_that_repo() {
        let keeper = make_keeper();
        let mut ns = Namespace::bare();
        ns.domains.insert("d1".into(), "r/abc".into());
        ns.domains.insert("d2".into(), "r/xyz".into());
        keeper.namespaces.update("ns1", ns).await.unwrap();

        keeper.track("ns1/d2", 0).await.unwrap();

        assert!(keeper.get_tracked("abc").await.unwrap().is_none());
        assert!(keeper.get_tracked("xyz").await.unwrap().is_some());

        keeper.untrack("ns1/d2").await.unwrap();
        assert!(keeper.get_tracked("xyz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn track_missing_namespace_domain_errors() {
        let keeper = make_keeper();
        let mut ns = Namespace::bare();
        ns.domains.insert("stuff".into(), "r/abc".into());
        keeper.namespaces.update("ns1", ns).await.unwrap();

        let err = keeper.track("ns1/missing", 0).await.unwrap_err();
        assert!(matches!(err, NodeError::NamespaceDomainNotFound(d) if d == "missing"));
    }

    #[tokio::test]
    async fn track_invalid_repo_identifier_errors() {
        let keeper = make_keeper();
        let err = keeper.track("not-a-valid-id", 0).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidRepoIdentifier(_)));
    }

    #[tokio::test]
    async fn track_unknown_namespace_with_trailing_slash_errors() {
        let keeper = make_keeper();
        let err = keeper.track("unknown/", 0).await.unwrap_err();
        assert!(matches!(err, NodeError::NamespaceNotFoundNamed(n) if n == "unknown"));
    }

    #[tokio::test]
    async fn track_owner_name_shaped_target_with_no_matching_namespace_is_a_plain_repo() {
        let keeper = make_keeper();
        keeper.track("acme/repo", 5).await.unwrap();
        assert_eq!(keeper.get_tracked("acme/repo").await.unwrap().unwrap().updated_at, 5);
    }

    #[tokio::test]
    async fn ref_last_sync_height_round_trips() {
        let keeper = make_keeper();
        assert_eq!(keeper.get_ref_last_sync_height("acme/repo", "refs/heads/main").await.unwrap(), 0);
        keeper.update_ref_last_sync_height("acme/repo", "refs/heads/main", 42).await.unwrap();
        assert_eq!(keeper.get_ref_last_sync_height("acme/repo", "refs/heads/main").await.unwrap(), 42);
    }
}
