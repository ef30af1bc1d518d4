//! Push authorization policy (spec.md §4.8 "Authorization"). The
//! action-derivation table is pure and lives here so the push handler and
//! its tests can exercise it without a real enforcer; the enforcer itself
//! (actual permission rules) is an external collaborator per spec.md §1.

use async_trait::async_trait;

use crate::core::error::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAction {
    /// tx detail has `mergeProposalID` set: skip policy entirely.
    SkipPolicy,
    Delete,
    Update,
    Write,
}

/// Derives the policy action for one pushed reference (spec.md §4.8 table).
pub fn derive_push_action(has_merge_proposal_id: bool, new_hash_is_zero: bool, admin_update: bool, ref_exists: bool) -> PushAction {
    if has_merge_proposal_id {
        PushAction::SkipPolicy
    } else if new_hash_is_zero {
        PushAction::Delete
    } else if admin_update && ref_exists {
        PushAction::Update
    } else {
        PushAction::Write
    }
}

/// The policy checker: `(enforcer, refName, isRefCreator, pusherKeyID,
/// isContributor, action)` (spec.md §4.8).
#[async_trait]
pub trait PolicyEnforcer: Send + Sync {
    async fn check(
        &self,
        ref_name: &str,
        is_ref_creator: bool,
        pusher_key_id: &str,
        is_contributor: bool,
        action: PushAction,
    ) -> Result<(), NodeError>;
}

/// Reference enforcer for tests and single-user deployments: creators may
/// do anything; contributors may write/update but not delete; nobody else
/// may act.
pub struct PermissiveEnforcer;

#[async_trait]
impl PolicyEnforcer for PermissiveEnforcer {
    async fn check(
        &self,
        ref_name: &str,
        is_ref_creator: bool,
        _pusher_key_id: &str,
        is_contributor: bool,
        action: PushAction,
    ) -> Result<(), NodeError> {
        if action == PushAction::SkipPolicy || is_ref_creator {
            return Ok(());
        }
        match action {
            PushAction::Delete if !is_contributor => {
                Err(NodeError::Authorization(format!("{ref_name} delete requires contributor access")))
            }
            _ if !is_contributor => Err(NodeError::Authorization(format!("{ref_name} requires contributor access"))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_proposal_always_skips_policy() {
        assert_eq!(derive_push_action(true, true, true, true), PushAction::SkipPolicy);
    }

    #[test]
    fn zero_hash_is_delete() {
        assert_eq!(derive_push_action(false, true, false, true), PushAction::Delete);
    }

    #[test]
    fn admin_update_on_existing_ref_is_update() {
        assert_eq!(derive_push_action(false, false, true, true), PushAction::Update);
    }

    #[test]
    fn otherwise_write() {
        assert_eq!(derive_push_action(false, false, false, true), PushAction::Write);
        assert_eq!(derive_push_action(false, false, true, false), PushAction::Write);
    }

    #[tokio::test]
    async fn permissive_enforcer_rejects_non_contributor_write() {
        let enforcer = PermissiveEnforcer;
        let err = enforcer.check("refs/heads/main", false, "key1", false, PushAction::Write).await.unwrap_err();
        assert!(matches!(err, NodeError::Authorization(_)));
    }

    #[tokio::test]
    async fn permissive_enforcer_allows_creator_delete() {
        let enforcer = PermissiveEnforcer;
        enforcer.check("refs/heads/main", true, "key1", false, PushAction::Delete).await.unwrap();
    }
}
