//! The on-disk git repository (spec.md §6, consumed): capturing pre-push
//! ref state, diffing it against the post-push state, reverting, running
//! GC, reading repo size, and piping bytes into `git-receive-pack`. The
//! actual git object store is an external collaborator per spec.md §1;
//! this module only defines the boundary the push handler drives through.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use gitnode_common::crypto::GitOid;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::core::error::NodeError;

/// `refName -> hash` snapshot of every ref in a repository at one point in
/// time (spec.md §4.8 "HandleStream ... capture the pre-push state").
pub type RefState = BTreeMap<String, GitOid>;

/// The per-ref delta between a captured old state and the current state,
/// scoped to one reference (spec.md §4.8 "Validate references", "Revert").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefChange {
    pub old_hash: GitOid,
    pub new_hash: GitOid,
}

impl RefChange {
    pub fn is_noop(&self) -> bool {
        self.old_hash == self.new_hash
    }
}

/// Computes the change for `reference` between two states; a ref absent
/// from either snapshot is treated as the zero hash (not-yet-created or
/// deleted).
pub fn diff_ref(old: &RefState, new: &RefState, reference: &str) -> RefChange {
    RefChange {
        old_hash: old.get(reference).copied().unwrap_or_else(GitOid::zero),
        new_hash: new.get(reference).copied().unwrap_or_else(GitOid::zero),
    }
}

#[async_trait]
pub trait GitRepo: Send + Sync {
    /// Current ref state read directly off disk (`git show-ref`-shaped).
    async fn current_state(&self) -> Result<RefState, NodeError>;
    /// Restores `reference` to `change.old_hash` (spec.md §4.8 "Revert").
    async fn revert(&self, reference: &str, change: RefChange) -> Result<(), NodeError>;
    /// Packs loose objects, prunes unreachables older than one day (spec.md
    /// §4.8 "GC and size check").
    async fn gc(&self) -> Result<(), NodeError>;
    async fn size_bytes(&self) -> Result<u64, NodeError>;
    /// Re-opens internal indices invalidated by `gc` (spec.md §4.8).
    async fn reload(&self) -> Result<(), NodeError>;
    /// Pipes `input` into `git-receive-pack`'s stdin; surfaces stderr on a
    /// nonzero exit (spec.md §4.8 "HandleStream").
    async fn receive_pack(&self, input: &[u8]) -> Result<(), NodeError>;
}

/// Shells out to the system `git` binary against a bare repository rooted
/// at `path`.
pub struct ProcessGitRepo {
    path: std::path::PathBuf,
}

impl ProcessGitRepo {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.path).args(args);
        cmd
    }
}

#[async_trait]
impl GitRepo for ProcessGitRepo {
    async fn current_state(&self) -> Result<RefState, NodeError> {
        let output = self
            .command(&["show-ref"])
            .output()
            .await
            .map_err(|e| NodeError::Other(e.to_string()))?;
        // `show-ref` exits 1 when the repository has no refs at all; that
        // is not an error for a freshly created repo.
        if !output.status.success() && !output.stdout.is_empty() {
            return Err(NodeError::Other(String::from_utf8_lossy(&output.stderr).into_owned()));
        }

        let mut state = RefState::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let Some((hash, reference)) = line.split_once(' ') else { continue };
            let Ok(hash) = GitOid::from_hex(hash) else { continue };
            state.insert(reference.to_string(), hash);
        }
        Ok(state)
    }

    async fn revert(&self, reference: &str, change: RefChange) -> Result<(), NodeError> {
        if change.old_hash.is_zero() {
            let status = self
                .command(&["update-ref", "-d", reference])
                .status()
                .await
                .map_err(|e| NodeError::Other(e.to_string()))?;
            if !status.success() {
                return Err(NodeError::Other(format!("git update-ref -d {reference} failed")));
            }
            return Ok(());
        }

        let status = self
            .command(&["update-ref", reference, &change.old_hash.to_hex()])
            .status()
            .await
            .map_err(|e| NodeError::Other(e.to_string()))?;
        if !status.success() {
            return Err(NodeError::Other(format!("git update-ref {reference} failed")));
        }
        Ok(())
    }

    async fn gc(&self) -> Result<(), NodeError> {
        let status = self
            .command(&["gc", "--prune=1.day.ago"])
            .status()
            .await
            .map_err(|e| NodeError::Other(e.to_string()))?;
        if !status.success() {
            return Err(NodeError::Other("git gc failed".to_string()));
        }
        Ok(())
    }

    async fn size_bytes(&self) -> Result<u64, NodeError> {
        let output = self
            .command(&["count-objects", "-v"])
            .output()
            .await
            .map_err(|e| NodeError::Other(e.to_string()))?;
        if !output.status.success() {
            return Err(NodeError::Other(String::from_utf8_lossy(&output.stderr).into_owned()));
        }

        let mut size_kib = 0u64;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if let Some(rest) = line.strip_prefix("size-pack: ").or_else(|| line.strip_prefix("size: ")) {
                size_kib += rest.trim().parse::<u64>().unwrap_or(0);
            }
        }
        Ok(size_kib * 1024)
    }

    async fn reload(&self) -> Result<(), NodeError> {
        // The process-backed implementation has no cached handle to
        // invalidate; every call above re-execs `git`.
        Ok(())
    }

    async fn receive_pack(&self, input: &[u8]) -> Result<(), NodeError> {
        let mut child = self
            .command(&["receive-pack", "."])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NodeError::Other(e.to_string()))?;

        let mut stdin = child.stdin.take().expect("stdin piped");
        stdin.write_all(input).await.map_err(|e| NodeError::ReceivePackWriteError(e.to_string()))?;
        drop(stdin);

        let output = child.wait_with_output().await.map_err(|e| NodeError::Other(e.to_string()))?;
        if !output.status.success() {
            return Err(NodeError::ReceivePackWriteError(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_ref_treats_missing_ref_as_zero_hash() {
        let old = RefState::new();
        let mut new = RefState::new();
        new.insert("refs/heads/main".to_string(), GitOid::new([1u8; 20]));

        let change = diff_ref(&old, &new, "refs/heads/main");
        assert!(change.old_hash.is_zero());
        assert_eq!(change.new_hash, GitOid::new([1u8; 20]));
        assert!(!change.is_noop());
    }

    #[test]
    fn diff_ref_is_noop_when_unchanged() {
        let mut state = RefState::new();
        state.insert("refs/heads/main".to_string(), GitOid::new([2u8; 20]));
        let change = diff_ref(&state, &state, "refs/heads/main");
        assert!(change.is_noop());
    }
}
