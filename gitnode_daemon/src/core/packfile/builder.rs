//! Packfile builder (spec.md §2 "Packfile builder", §4.11): rebuilds a
//! reference-update request + packfile from a push note so it can be
//! replayed against `git-receive-pack` (used when re-syncing a tracked
//! repo from a note alone). Fetching the actual object bytes for the
//! commit range is the on-disk git object store's job — an external
//! collaborator per spec.md §1 — so this module takes a `pack_data`
//! provider and only owns the wire-format assembly.

use gitnode_common::push_note::PushNote;

use super::wire::{encode_reference_update_request, ReferenceUpdateRequest, RefCommand};
use crate::core::error::PackfileError;

pub struct PackfileBuilder;

impl PackfileBuilder {
    /// `pack_data` is expected to return the raw packfile bytes (including
    /// the `PACK` header) covering every object reachable from each
    /// reference's `new_hash` back to its `old_hash`.
    pub fn build(
        note: &PushNote,
        pack_data: impl FnOnce(&PushNote) -> Result<Vec<u8>, PackfileError>,
    ) -> Result<Vec<u8>, PackfileError> {
        let request = ReferenceUpdateRequest {
            commands: note
                .references
                .iter()
                .map(|r| RefCommand { name: r.name.clone(), old_hash: r.old_hash, new_hash: r.new_hash })
                .collect(),
            capabilities: vec!["report-status".to_string()],
        };

        let mut out = encode_reference_update_request(&request);
        let all_deletions = note.references.iter().all(|r| r.new_hash.is_zero());
        if !all_deletions {
            out.extend_from_slice(&pack_data(note)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitnode_common::crypto::{Address, GitOid, PublicKey, Signature};
    use gitnode_common::push_note::PushedReference;

    fn note_with_refs(refs: Vec<PushedReference>) -> PushNote {
        PushNote {
            repo_name: "acme/repo".into(),
            namespace: String::new(),
            references: refs,
            pusher_key_id: "key1".into(),
            pusher_address: Address::zero(),
            size: 0,
            timestamp: 0,
            pusher_account_nonce: 0,
            remote_node_signature: Signature::zero(),
            creator_public_key: PublicKey::zero(),
        }
    }

    fn reference(name: &str, old: u8, new: u8) -> PushedReference {
        PushedReference {
            name: name.into(),
            old_hash: GitOid::new([old; 20]),
            new_hash: GitOid::new([new; 20]),
            nonce: 1,
            merge_proposal_id: None,
            fee: 0,
            value: 0,
            push_sig: Signature::zero(),
            data: vec![],
        }
    }

    #[test]
    fn deletion_only_note_skips_pack_data() {
        let note = note_with_refs(vec![reference("refs/heads/gone", 1, 0)]);
        let bytes = PackfileBuilder::build(&note, |_| panic!("should not be called")).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn non_deletion_note_includes_pack_data() {
        let note = note_with_refs(vec![reference("refs/heads/main", 1, 2)]);
        let bytes = PackfileBuilder::build(&note, |_| Ok(b"PACKDATA".to_vec())).unwrap();
        assert!(bytes.ends_with(b"PACKDATA"));
    }
}
