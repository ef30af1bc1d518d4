//! Push handler (spec.md §4.8): the state machine a single incoming git
//! push drives through, from the raw packfile stream to a pooled,
//! announced `PushNote`. Every external collaborator it touches — the
//! on-disk repo, the policy enforcer, the DHT, the mempool, the remote
//! server — is a trait boundary defined elsewhere in this crate (spec.md
//! §1, §6); this module only owns the sequencing between them.
//!
//! States run in this order: `HandleStream` (capture + decode + authorize +
//! pipe to git-receive-pack) -> `ValidateRefs` -> `Revert` (idempotent,
//! always runs on a failure from authorize through validate) -> note
//! creation (or reuse of a caller-provided note) -> network check -> GC and
//! size check -> pool add and announce -> broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gitnode_common::crypto::{Address, GitOid, Hash, KeyPair, Signature, HASH_SIZE};
use gitnode_common::dht::DhtObjectType;
use gitnode_common::push_note::{PushNote, PushedReference};
use gitnode_common::transaction::{Transaction, TransactionPayload};

use crate::core::announcer::AnnouncerSession;
use crate::core::error::{NodeError, PackfileError};
use crate::core::git_repo::{diff_ref, GitRepo, RefChange, RefState};
use crate::core::keepers::dht::DhtKeeper;
use crate::core::keepers::repository::RepositoryKeeper;
use crate::core::mempool::{Mempool, MempoolEvent};
use crate::core::packfile::{PackfileReadResult, PackfileReader, ReadObject, ReferenceUpdateRequest};
use crate::core::policy::{derive_push_action, PolicyEnforcer, PushAction};
use crate::core::remote::RemoteServer;

/// Per-reference detail a caller must supply alongside the raw packfile
/// stream — everything `ValidateRefs`/`Authorize` needs that the wire
/// format itself doesn't carry (spec.md §4.8 "Authorization": "every
/// pushed reference must have an associated transaction-detail record").
#[derive(Debug, Clone, Default)]
pub struct PushedReferenceTxDetail {
    pub merge_proposal_id: Option<String>,
    pub fee: u64,
    pub value: u64,
    pub push_sig: Signature,
    pub data: Vec<u8>,
    pub is_admin_update: bool,
}

/// Everything the handler needs about the pusher and target beyond the
/// packfile bytes themselves.
pub struct PushRequestContext {
    pub repo_name: String,
    pub namespace: String,
    pub pusher_key_id: String,
    pub pusher_address: Address,
    pub pusher_account_nonce: u64,
    pub is_ref_creator: bool,
    pub is_contributor: bool,
    pub tx_details: HashMap<String, PushedReferenceTxDetail>,
}

/// A "post-ref" is a ref namespace carrying discussion objects layered on
/// top of repo history (issues, merge requests) rather than code itself;
/// `HandleAuthorization`'s first pass ignores these, and `ValidateRefs`
/// re-authorizes them individually only when admin-updated (spec.md §4.8).
fn is_post_ref(name: &str) -> bool {
    name.contains("/issues/") || name.contains("/merge-requests/")
}

/// Hook for repo-specific rules on a reference change beyond what the
/// policy table covers (protected branches, fast-forward-only, etc.); an
/// external collaborator per spec.md §1, modeled here as a trait.
#[async_trait]
pub trait ChangeValidator: Send + Sync {
    async fn validate(&self, repo: &str, reference: &str, change: RefChange) -> Result<(), NodeError>;
}

pub struct PermissiveChangeValidator;

#[async_trait]
impl ChangeValidator for PermissiveChangeValidator {
    async fn validate(&self, _repo: &str, _reference: &str, _change: RefChange) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Hook checking a merge-proposal-carrying reference actually complies
/// with the proposal it claims (target branch, fast-forward from the
/// proposal's base, etc.); an external collaborator per spec.md §1.
#[async_trait]
pub trait MergeComplianceChecker: Send + Sync {
    async fn check(&self, repo: &str, reference: &str, merge_proposal_id: &str, change: RefChange) -> Result<(), NodeError>;
}

pub struct PermissiveMergeComplianceChecker;

#[async_trait]
impl MergeComplianceChecker for PermissiveMergeComplianceChecker {
    async fn check(&self, _repo: &str, _reference: &str, _merge_proposal_id: &str, _change: RefChange) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Sum of object sizes reached by one push, as required to size-check the
/// would-be note (spec.md §4.8 "Note creation" / `GetSizeOfObjects`). A
/// note without a target repo is rejected outright.
pub fn size_of_objects(repo: Option<&str>, objects: &[ReadObject]) -> Result<u64, PackfileError> {
    if repo.is_none() {
        return Err(PackfileError::RepoRequired);
    }
    Ok(objects.iter().map(|o| o.size).sum())
}

fn tx_note_id(tx: &Transaction) -> Option<Hash> {
    match &tx.payload {
        TransactionPayload::Generic(bytes) if bytes.len() == HASH_SIZE => {
            let mut arr = [0u8; HASH_SIZE];
            arr.copy_from_slice(bytes);
            Some(Hash::new(arr))
        }
        _ => None,
    }
}

/// One incoming push's handler instance. Not `Send`-shared across pushes:
/// each push gets its own handler, constructed fresh, carrying the
/// pre-push state it captures once on `handle_stream`.
pub struct PushHandler {
    repo: Arc<dyn GitRepo>,
    remote: Arc<dyn RemoteServer>,
    repository_keeper: Arc<dyn RepositoryKeeper>,
    dht_keeper: Arc<dyn DhtKeeper>,
    mempool: Arc<dyn Mempool>,
    change_validator: Arc<dyn ChangeValidator>,
    merge_checker: Arc<dyn MergeComplianceChecker>,
    max_blob_size: u64,
    old_state: Mutex<Option<RefState>>,
    reverted: AtomicBool,
    /// The reference-update request decoded so far, captured as soon as
    /// the packfile reader's authorize callback fires — i.e. before any
    /// AUTHORIZE/VALIDATE_REFS failure, so `run` can still drive `REVERT`
    /// even when `handle_stream` itself returns an error (spec.md §4.8
    /// "Any failure from AUTHORIZE through VALIDATE_REFS triggers an
    /// always-runnable REVERT").
    last_request: Mutex<Option<ReferenceUpdateRequest>>,
}

impl PushHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn GitRepo>,
        remote: Arc<dyn RemoteServer>,
        repository_keeper: Arc<dyn RepositoryKeeper>,
        dht_keeper: Arc<dyn DhtKeeper>,
        mempool: Arc<dyn Mempool>,
        change_validator: Arc<dyn ChangeValidator>,
        merge_checker: Arc<dyn MergeComplianceChecker>,
        max_blob_size: u64,
    ) -> Self {
        Self {
            repo,
            remote,
            repository_keeper,
            dht_keeper,
            mempool,
            change_validator,
            merge_checker,
            max_blob_size,
            old_state: Mutex::new(None),
            reverted: AtomicBool::new(false),
            last_request: Mutex::new(None),
        }
    }

    /// `HandleStream` (spec.md §4.8): captures the pre-push ref state once,
    /// then reads `input` through the packfile reader, authorizing the
    /// decoded reference-update request before any bytes reach
    /// `git-receive-pack`.
    pub async fn handle_stream(&self, ctx: &PushRequestContext, input: Vec<u8>) -> Result<PackfileReadResult, NodeError> {
        {
            let mut old_state = self.old_state.lock().expect("push handler lock poisoned");
            if old_state.is_none() {
                *old_state = Some(self.repo.current_state().await?);
            }
        }

        let reader = PackfileReader::new(self.max_blob_size);
        let enforcer = self.remote.get_logic();
        let auth_error: Mutex<Option<NodeError>> = Mutex::new(None);
        let mut sink = Vec::new();

        // The reader's authorize callback runs synchronously (spec.md §5,
        // "blocking I/O by design"), but policy checks are async. Driving
        // the async call with `block_on` is safe here: every keeper/policy
        // call on this path is in-memory and never touches the Tokio
        // reactor, so there is nothing for `block_on` to deadlock against.
        let mut authorize = |request: &ReferenceUpdateRequest| -> Result<(), PackfileError> {
            *self.last_request.lock().expect("push handler lock poisoned") = Some(request.clone());
            match futures::executor::block_on(self.handle_authorization(ctx, enforcer.as_ref(), request)) {
                Ok(()) => Ok(()),
                Err(err) => {
                    let message = err.to_string();
                    *auth_error.lock().expect("push handler lock poisoned") = Some(err);
                    Err(PackfileError::Parse(message))
                }
            }
        };

        let read_result = match reader.read(input.as_slice(), &mut authorize, &mut sink) {
            Ok(result) => result,
            Err(packfile_err) => {
                if let Some(err) = auth_error.lock().expect("push handler lock poisoned").take() {
                    return Err(err);
                }
                return Err(NodeError::from(packfile_err));
            }
        };

        self.repo.receive_pack(&sink).await?;
        Ok(read_result)
    }

    /// `HandleAuthorization`: authorizes every command in `request`,
    /// ignoring post-refs on this first pass (spec.md §4.8).
    pub async fn handle_authorization(
        &self,
        ctx: &PushRequestContext,
        enforcer: &dyn PolicyEnforcer,
        request: &ReferenceUpdateRequest,
    ) -> Result<(), NodeError> {
        for command in &request.commands {
            self.do_auth(ctx, enforcer, &command.name, request, true).await?;
        }
        Ok(())
    }

    /// `DoAuth(targetRef, ignorePostRefs)`: the general single-reference
    /// authorization check, reused both by `HandleAuthorization` (always
    /// ignoring post-refs) and by `ValidateRefs`'s re-check of an
    /// admin-updated post-ref (never ignoring it).
    async fn do_auth(
        &self,
        ctx: &PushRequestContext,
        enforcer: &dyn PolicyEnforcer,
        target_ref: &str,
        request: &ReferenceUpdateRequest,
        ignore_post_refs: bool,
    ) -> Result<(), NodeError> {
        if ignore_post_refs && is_post_ref(target_ref) {
            return Ok(());
        }

        let Some(command) = request.commands.iter().find(|c| c.name == target_ref) else {
            return Ok(());
        };

        let result: Result<(), NodeError> = async {
            let tx_detail = ctx
                .tx_details
                .get(&command.name)
                .ok_or_else(|| NodeError::MissingReferenceTxInfo(command.name.clone()))?;
            let ref_exists = !command.old_hash.is_zero();
            let action = derive_push_action(tx_detail.merge_proposal_id.is_some(), command.new_hash.is_zero(), tx_detail.is_admin_update, ref_exists);
            if action == PushAction::SkipPolicy {
                return Ok(());
            }
            enforcer.check(&command.name, ctx.is_ref_creator, &ctx.pusher_key_id, ctx.is_contributor, action).await
        }
        .await;

        result.map_err(|e| match e {
            NodeError::Authorization(_) => e,
            other => NodeError::Authorization(other.to_string()),
        })
    }

    /// `ValidateRefs` (spec.md §4.8): diffs each pushed reference against
    /// the captured pre-push state, runs the change validator, re-checks
    /// merge-proposal compliance, and re-authorizes admin-updated post-refs.
    pub async fn validate_references(&self, ctx: &PushRequestContext, request: &ReferenceUpdateRequest) -> Result<(), NodeError> {
        let old_state = self.old_state.lock().expect("push handler lock poisoned").clone().ok_or(NodeError::OldStateNotCaptured)?;
        let current_state = self.repo.current_state().await?;
        let enforcer = self.remote.get_logic();

        for command in &request.commands {
            let change = diff_ref(&old_state, &current_state, &command.name);
            if !change.is_noop() {
                self.change_validator.validate(&ctx.repo_name, &command.name, change).await?;
            }

            let Some(tx_detail) = ctx.tx_details.get(&command.name) else {
                continue;
            };
            if let Some(merge_proposal_id) = &tx_detail.merge_proposal_id {
                self.merge_checker.check(&ctx.repo_name, &command.name, merge_proposal_id, change).await?;
            }
            if tx_detail.is_admin_update && is_post_ref(&command.name) {
                self.do_auth(ctx, enforcer.as_ref(), &command.name, request, false).await?;
            }
        }
        Ok(())
    }

    /// `Revert` (spec.md §4.8): idempotent — a second call on the same
    /// handler, once reversion already succeeded, is a no-op. A failed
    /// reversion may be retried on a later call.
    pub async fn handle_reversion(&self, request: &ReferenceUpdateRequest) -> Result<(), NodeError> {
        if self.reverted.load(Ordering::SeqCst) {
            return Ok(());
        }

        let old_state = self.old_state.lock().expect("push handler lock poisoned").clone().ok_or(NodeError::OldStateNotCaptured)?;
        let current_state = self.repo.current_state().await?;

        let mut errors = Vec::new();
        for command in &request.commands {
            let change = diff_ref(&old_state, &current_state, &command.name);
            if let Err(e) = self.repo.revert(&command.name, change).await {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            self.reverted.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(NodeError::Validation(errors.join("; ")))
        }
    }

    /// Note creation (spec.md §4.8): builds a `PushNote` from the decoded
    /// request and the push's object list, assigning each reference the
    /// next nonce after whatever the pool currently holds for it, then
    /// signs it with the node's own validator key.
    pub async fn create_note(
        &self,
        ctx: &PushRequestContext,
        request: &ReferenceUpdateRequest,
        read_result: &PackfileReadResult,
        creator_key: &KeyPair,
        timestamp: i64,
    ) -> Result<PushNote, NodeError> {
        let _ = self.repository_keeper.get(&ctx.repo_name, 0).await?;
        let size = size_of_objects(Some(&ctx.repo_name), &read_result.objects).map_err(NodeError::from)?;
        let push_pool = self.remote.get_push_pool();

        let mut references = Vec::with_capacity(request.commands.len());
        for command in &request.commands {
            let tx_detail = ctx.tx_details.get(&command.name).cloned().unwrap_or_default();
            let next_nonce = push_pool.ref_nonce(&ctx.repo_name, &command.name) + 1;
            references.push(PushedReference {
                name: command.name.clone(),
                old_hash: command.old_hash,
                new_hash: command.new_hash,
                nonce: next_nonce,
                merge_proposal_id: tx_detail.merge_proposal_id,
                fee: tx_detail.fee,
                value: tx_detail.value,
                push_sig: tx_detail.push_sig,
                data: tx_detail.data,
            });
        }

        let mut note = PushNote {
            repo_name: ctx.repo_name.clone(),
            namespace: ctx.namespace.clone(),
            references,
            pusher_key_id: ctx.pusher_key_id.clone(),
            pusher_address: ctx.pusher_address,
            size,
            timestamp,
            pusher_account_nonce: ctx.pusher_account_nonce,
            remote_node_signature: Signature::zero(),
            creator_public_key: creator_key.public_key(),
        };
        note.remote_node_signature = creator_key.sign(&note.signing_bytes());
        Ok(note)
    }

    /// Schedules a resync after a reference-hash mismatch with local or
    /// network state and logs a warning (spec.md §4.8 `HandleRefMismatch`).
    async fn handle_ref_mismatch(&self, note: &PushNote, reference: &str, net_mismatch: bool) -> Result<(), NodeError> {
        log::warn!(
            "push handler: reference ({reference}) mismatch ({}) for {}; scheduling resync",
            if net_mismatch { "network" } else { "local" },
            note.repo_name,
        );
        self.remote.try_schedule_resync(note, reference, net_mismatch).await
    }

    /// Validates the would-be note against the network's view before it is
    /// pooled. A mismatch schedules a resync for every reference and stops
    /// the push here without pooling or announcing anything.
    pub async fn check_note_and_handle_mismatch(&self, note: &PushNote) -> Result<(), NodeError> {
        if let Err(err) = self.remote.check_note(note).await {
            for reference in &note.references {
                self.handle_ref_mismatch(note, &reference.name, true).await?;
            }
            return Err(NodeError::Validation(format!("reference mismatch for {}: {err}", note.repo_name)));
        }
        Ok(())
    }

    /// GC and size check (spec.md §4.8): packs/prunes, reloads internal
    /// indices invalidated by GC, then rejects the push if the resulting
    /// repo size exceeds `max_repo_size`.
    pub async fn gc_and_size_check(&self, max_repo_size: u64) -> Result<(), NodeError> {
        self.repo.gc().await?;
        let size = self.repo.size_bytes().await?;
        self.repo.reload().await?;
        if size > max_repo_size {
            return Err(NodeError::Validation(format!(
                "repository size {size} bytes exceeds the maximum allowed {max_repo_size} bytes"
            )));
        }
        Ok(())
    }

    /// Pool add and announce (spec.md §4.8): pools the note, then
    /// announces every commit/tag object the push introduced through a
    /// fresh announcer session. Broadcasting the note and this node's
    /// endorsement only happens once every announcement has succeeded.
    pub async fn pool_add_and_announce(&self, note: PushNote, read_result: &PackfileReadResult) -> Result<(), NodeError> {
        let push_pool = self.remote.get_push_pool();
        push_pool.add(note.clone())?;

        let dht = self.remote.get_dht();
        let session = AnnouncerSession::new(self.dht_keeper.clone(), dht);

        for object in &read_result.objects {
            let object_type = match object.kind {
                gix_object::Kind::Commit => DhtObjectType::Commit,
                gix_object::Kind::Tag => DhtObjectType::Tag,
                _ => continue, // blobs and trees are not announced (spec.md §4.8)
            };
            let key = Hash::hash(object.hash.as_bytes());
            session.announce(object_type, note.repo_name.clone(), key);
        }

        let remote = self.remote.clone();
        let note_for_broadcast = note.clone();
        session.on_done(move |err_count| {
            if err_count == 0 {
                tokio::spawn(async move {
                    if let Err(e) = remote.broadcast_note_and_endorsement(&note_for_broadcast).await {
                        log::warn!("push handler: broadcast failed for {}: {e}", note_for_broadcast.repo_name);
                    }
                });
            } else {
                log::warn!("push handler: {err_count} announcement(s) failed for {}; broadcast skipped", note.repo_name);
            }
        });

        Ok(())
    }

    /// `WaitForPushTx` (spec.md §4.8): a non-blocking helper returning a
    /// channel yielding either the hash of the eventual push transaction or
    /// an error, by subscribing to mempool events for a transaction whose
    /// referenced note id matches `note_id`. Times out after 60 seconds.
    pub fn wait_for_push_tx(&self, note_id: Hash) -> tokio::sync::oneshot::Receiver<Result<Hash, String>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut mempool_rx = self.mempool.subscribe();
        tokio::spawn(async move {
            let timeout = tokio::time::sleep(std::time::Duration::from_secs(60));
            tokio::pin!(timeout);
            loop {
                tokio::select! {
                    _ = &mut timeout => {
                        let _ = tx.send(Err("timed out waiting for push transaction".to_string()));
                        return;
                    }
                    event = mempool_rx.recv() => {
                        match event {
                            Ok(MempoolEvent::Added(added_tx)) => {
                                if tx_note_id(&added_tx) == Some(note_id) {
                                    let _ = tx.send(Ok(added_tx.hash()));
                                    return;
                                }
                            }
                            Ok(MempoolEvent::Rejected { tx: rejected_tx, error }) => {
                                if tx_note_id(&rejected_tx) == Some(note_id) {
                                    let _ = tx.send(Err(error));
                                    return;
                                }
                            }
                            Err(_) => return,
                        }
                    }
                }
            }
        });
        rx
    }

    /// Runs the full state machine for one push: `HandleStream` (which
    /// authorizes internally) -> `ValidateRefs` -> `Revert` on any failure
    /// from that point -> note creation (or reuse of `provided_note`) ->
    /// network check -> GC/size check -> pool add and announce. Failures
    /// after pool add only log; they no longer unwind the push.
    pub async fn run(
        &self,
        ctx: &PushRequestContext,
        input: Vec<u8>,
        creator_key: &KeyPair,
        max_repo_size: u64,
        timestamp: i64,
        provided_note: Option<PushNote>,
    ) -> Result<PushNote, NodeError> {
        let read_result = match self.handle_stream(ctx, input).await {
            Ok(result) => result,
            Err(err) => {
                // AUTHORIZE failures land here: the request was decoded (and
                // captured) before authorization ran, so REVERT can still
                // run against it per spec.md §4.8's "always-runnable" rule.
                if let Some(request) = self.last_request.lock().expect("push handler lock poisoned").clone() {
                    let _ = self.handle_reversion(&request).await;
                }
                return Err(err);
            }
        };

        if let Err(err) = self.validate_references(ctx, &read_result.reference_update_request).await {
            let _ = self.handle_reversion(&read_result.reference_update_request).await;
            return Err(err);
        }
        self.handle_reversion(&read_result.reference_update_request).await?;

        let note = match provided_note {
            Some(note) => note,
            None => {
                self.create_note(ctx, &read_result.reference_update_request, &read_result, creator_key, timestamp)
                    .await?
            }
        };

        self.check_note_and_handle_mismatch(&note).await?;
        self.gc_and_size_check(max_repo_size).await?;

        if let Err(err) = self.pool_add_and_announce(note.clone(), &read_result).await {
            log::warn!("push handler: failure after pool add for {}: {err}", note.repo_name);
        }

        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dht_client::RecordingDht;
    use crate::core::keepers::dht::TreeDhtKeeper;
    use crate::core::keepers::repository::TreeRepositoryKeeper;
    use crate::core::mempool::InMemoryMempool;
    use crate::core::packfile::{encode_reference_update_request, RefCommand};
    use crate::core::policy::PermissiveEnforcer;
    use crate::core::push_pool::PushPool;
    use crate::core::remote::{LocalRemoteServer, NodeCfg};
    use crate::core::storage::Storage;
    use gitnode_common::crypto::PublicKey;
    use rand::rngs::OsRng;
    use std::sync::atomic::AtomicUsize;

    struct InMemoryGitRepo {
        state: std::sync::Mutex<RefState>,
        revert_calls: AtomicUsize,
        fail_revert: bool,
    }

    impl InMemoryGitRepo {
        fn new() -> Self {
            Self { state: std::sync::Mutex::new(RefState::new()), revert_calls: AtomicUsize::new(0), fail_revert: false }
        }

        fn with_ref(name: &str, hash: GitOid) -> Self {
            let repo = Self::new();
            repo.state.lock().unwrap().insert(name.to_string(), hash);
            repo
        }
    }

    #[async_trait]
    impl GitRepo for InMemoryGitRepo {
        async fn current_state(&self) -> Result<RefState, NodeError> {
            Ok(self.state.lock().unwrap().clone())
        }

        async fn revert(&self, reference: &str, change: RefChange) -> Result<(), NodeError> {
            self.revert_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_revert {
                return Err(NodeError::Other("revert failed".into()));
            }
            if change.old_hash.is_zero() {
                self.state.lock().unwrap().remove(reference);
            } else {
                self.state.lock().unwrap().insert(reference.to_string(), change.old_hash);
            }
            Ok(())
        }

        async fn gc(&self) -> Result<(), NodeError> {
            Ok(())
        }

        async fn size_bytes(&self) -> Result<u64, NodeError> {
            Ok(0)
        }

        async fn reload(&self) -> Result<(), NodeError> {
            Ok(())
        }

        async fn receive_pack(&self, _input: &[u8]) -> Result<(), NodeError> {
            Ok(())
        }
    }

    fn handler(repo: Arc<dyn GitRepo>) -> (PushHandler, Arc<PushPool>) {
        let storage = Arc::new(Storage::new());
        let push_pool = Arc::new(PushPool::new(10));
        let dht = Arc::new(RecordingDht::new());
        let remote = Arc::new(LocalRemoteServer::new(
            push_pool.clone(),
            Arc::new(PermissiveEnforcer),
            dht,
            Arc::new(crate::core::keepers::push_key::TreePushKeyKeeper::new(storage.clone())),
            KeyPair::generate(&mut OsRng),
            NodeCfg { max_repo_size: u64::MAX, max_push_file_size: u64::MAX },
        ));
        let handler = PushHandler::new(
            repo,
            remote,
            Arc::new(TreeRepositoryKeeper::new(storage.clone())),
            Arc::new(TreeDhtKeeper::new(storage)),
            Arc::new(InMemoryMempool::new()),
            Arc::new(PermissiveChangeValidator),
            Arc::new(PermissiveMergeComplianceChecker),
            10 * 1024 * 1024,
        );
        (handler, push_pool)
    }

    fn ctx_with_ref(name: &str, creator: bool) -> PushRequestContext {
        let mut tx_details = HashMap::new();
        tx_details.insert(name.to_string(), PushedReferenceTxDetail::default());
        PushRequestContext {
            repo_name: "acme/repo".into(),
            namespace: String::new(),
            pusher_key_id: "key1".into(),
            pusher_address: Address::zero(),
            pusher_account_nonce: 1,
            is_ref_creator: creator,
            is_contributor: creator,
            tx_details,
        }
    }

    fn packfile_bytes(name: &str, old: GitOid, new: GitOid) -> Vec<u8> {
        encode_reference_update_request(&ReferenceUpdateRequest {
            commands: vec![RefCommand { name: name.into(), old_hash: old, new_hash: new }],
            capabilities: vec![],
        })
    }

    #[tokio::test]
    async fn validate_references_without_captured_state_fails() {
        let (handler, _pool) = handler(Arc::new(InMemoryGitRepo::new()));
        let request = ReferenceUpdateRequest {
            commands: vec![RefCommand { name: "refs/heads/main".into(), old_hash: GitOid::zero(), new_hash: GitOid::new([1u8; 20]) }],
            capabilities: vec![],
        };
        let err = handler.validate_references(&ctx_with_ref("refs/heads/main", true), &request).await.unwrap_err();
        assert!(matches!(err, NodeError::OldStateNotCaptured));
    }

    #[tokio::test]
    async fn non_contributor_write_is_rejected_as_authorization_error() {
        let (handler, _pool) = handler(Arc::new(InMemoryGitRepo::new()));
        let ctx = ctx_with_ref("refs/heads/main", false);
        let bytes = packfile_bytes("refs/heads/main", GitOid::zero(), GitOid::new([1u8; 20]));
        let err = handler.handle_stream(&ctx, bytes).await.unwrap_err();
        assert!(matches!(err, NodeError::Authorization(_)));
    }

    #[tokio::test]
    async fn missing_tx_detail_is_wrapped_as_authorization_error() {
        let (handler, _pool) = handler(Arc::new(InMemoryGitRepo::new()));
        let mut ctx = ctx_with_ref("refs/heads/main", true);
        ctx.tx_details.clear();
        let bytes = packfile_bytes("refs/heads/main", GitOid::zero(), GitOid::new([1u8; 20]));
        let err = handler.handle_stream(&ctx, bytes).await.unwrap_err();
        assert!(matches!(err, NodeError::Authorization(_)));
    }

    #[tokio::test]
    async fn reversion_is_idempotent_and_restores_old_hash() {
        let repo = Arc::new(InMemoryGitRepo::with_ref("refs/heads/main", GitOid::new([9u8; 20])));
        let (handler, _pool) = handler(repo.clone());
        let ctx = ctx_with_ref("refs/heads/main", true);
        let bytes = packfile_bytes("refs/heads/main", GitOid::new([9u8; 20]), GitOid::new([1u8; 20]));

        handler.handle_stream(&ctx, bytes).await.unwrap();
        repo.state.lock().unwrap().insert("refs/heads/main".to_string(), GitOid::new([1u8; 20]));

        let request = ReferenceUpdateRequest {
            commands: vec![RefCommand { name: "refs/heads/main".into(), old_hash: GitOid::new([9u8; 20]), new_hash: GitOid::new([1u8; 20]) }],
            capabilities: vec![],
        };
        handler.handle_reversion(&request).await.unwrap();
        handler.handle_reversion(&request).await.unwrap();

        assert_eq!(repo.revert_calls.load(Ordering::SeqCst), 1);
        assert_eq!(repo.state.lock().unwrap().get("refs/heads/main"), Some(&GitOid::new([9u8; 20])));
    }

    #[tokio::test]
    async fn failed_reversion_surfaces_error_and_may_be_retried() {
        let mut repo = InMemoryGitRepo::with_ref("refs/heads/main", GitOid::new([9u8; 20]));
        repo.fail_revert = true;
        let repo = Arc::new(repo);
        let (handler, _pool) = handler(repo.clone());

        let request = ReferenceUpdateRequest {
            commands: vec![RefCommand { name: "refs/heads/main".into(), old_hash: GitOid::new([9u8; 20]), new_hash: GitOid::new([1u8; 20]) }],
            capabilities: vec![],
        };
        let err = handler.handle_reversion(&request).await.unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
        let err = handler.handle_reversion(&request).await.unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
        assert_eq!(repo.revert_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_reverts_on_authorization_failure() {
        let repo = Arc::new(InMemoryGitRepo::with_ref("refs/heads/main", GitOid::new([9u8; 20])));
        let (handler, _pool) = handler(repo.clone());
        // Not a contributor: the write action is rejected during AUTHORIZE,
        // which per spec.md §4.8 must still trigger an always-runnable
        // REVERT, not just propagate the error.
        let ctx = ctx_with_ref("refs/heads/main", false);
        let bytes = packfile_bytes("refs/heads/main", GitOid::new([9u8; 20]), GitOid::new([1u8; 20]));
        let creator_key = KeyPair::generate(&mut OsRng);

        let err = handler.run(&ctx, bytes, &creator_key, u64::MAX, 0, None).await.unwrap_err();
        assert!(matches!(err, NodeError::Authorization(_)));
        assert_eq!(repo.revert_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_pools_and_announces_on_success() {
        let (handler, pool) = handler(Arc::new(InMemoryGitRepo::new()));
        let ctx = ctx_with_ref("refs/heads/main", true);
        let bytes = packfile_bytes("refs/heads/main", GitOid::zero(), GitOid::new([1u8; 20]));
        let creator_key = KeyPair::generate(&mut OsRng);

        let note = handler.run(&ctx, bytes, &creator_key, u64::MAX, 0, None).await.unwrap();
        assert_eq!(note.repo_name, "acme/repo");
        assert_eq!(note.references[0].nonce, 1);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn size_of_objects_requires_a_repo() {
        let err = size_of_objects(None, &[]).unwrap_err();
        assert!(matches!(err, PackfileError::RepoRequired));
    }

    #[tokio::test]
    async fn size_of_objects_sums_object_sizes() {
        let objects = vec![
            ReadObject { kind: gix_object::Kind::Blob, hash: GitOid::new([1u8; 20]), size: 10 },
            ReadObject { kind: gix_object::Kind::Commit, hash: GitOid::new([2u8; 20]), size: 5 },
        ];
        assert_eq!(size_of_objects(Some("acme/repo"), &objects).unwrap(), 15);
    }

    #[test]
    fn tx_note_id_reads_generic_payload() {
        let note_id = Hash::hash(b"note-1");
        let tx = Transaction {
            sender: PublicKey::zero(),
            nonce: 1,
            fee: 0,
            payload: TransactionPayload::Generic(note_id.as_bytes().to_vec()),
            signature: Signature::zero(),
        };
        assert_eq!(tx_note_id(&tx), Some(note_id));
    }

    #[test]
    fn tx_note_id_ignores_submit_work_payload() {
        let tx = Transaction {
            sender: PublicKey::zero(),
            nonce: 1,
            fee: 0,
            payload: TransactionPayload::SubmitWork(gitnode_common::transaction::SubmitWorkPayload { epoch: 1, nonce: 2 }),
            signature: Signature::zero(),
        };
        assert_eq!(tx_note_id(&tx), None);
    }
}
