use strum::IntoStaticStr;
use thiserror::Error;

use gitnode_common::error::ErrorWithKind;
use gitnode_common::serializer::ReaderError;

/// The node's unified error taxonomy (spec.md §7). Not-found sentinels are
/// distinct variants, never string-matched; decode failures are treated as
/// corruption (process abort is the caller's responsibility — keepers
/// surface `Corruption` rather than panicking themselves so callers can log
/// context first).
///
/// `IntoStaticStr` mirrors the teacher's `VerificationError` taxonomy
/// (`xelis_common::transaction::verify::error`), giving every variant a
/// stable name for `ErrorWithKind`-shaped surfaces without string-matching
/// `Display` output.
#[derive(Error, Debug, IntoStaticStr)]
pub enum NodeError {
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("kv error: {0}")]
    Kv(#[from] KvError),

    #[error(transparent)]
    Decode(#[from] ReaderError),

    #[error("state corruption: failed to decode persisted {what} at key {key}")]
    Corruption { what: &'static str, key: String },

    #[error("transaction not found")]
    ErrTxNotFound,

    #[error("block info not found")]
    ErrBlockInfoNotFound,

    #[error("record not found")]
    ErrRecordNotFound,

    #[error("invalid address format")]
    InvalidAddressFormat,

    #[error("namespace not found")]
    NamespaceNotFound,

    #[error("namespace domain ({0}) not found")]
    NamespaceDomainNotFound(String),

    #[error("domain not found")]
    DomainNotFound,

    #[error("namespace ({0}) not found")]
    NamespaceNotFoundNamed(String),

    #[error("target ({0}) is not a valid repo identifier")]
    InvalidRepoIdentifier(String),

    #[error("failed to index tx: {0}")]
    TxIndexFailed(String),

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("reference ({0}) has no transaction information")]
    MissingReferenceTxInfo(String),

    #[error("{0}")]
    Validation(String),

    #[error("expected old state to have been captured")]
    OldStateNotCaptured,

    #[error("git-receive-pack: write error: {0}")]
    ReceivePackWriteError(String),

    #[error(transparent)]
    PushPool(#[from] PushPoolError),

    #[error(transparent)]
    Packfile(#[from] PackfileError),

    #[error(transparent)]
    Miner(#[from] MinerError),

    #[error(transparent)]
    Announcer(#[from] AnnouncerError),

    #[error("{0}")]
    Other(String),
}

impl NodeError {
    /// Stable variant name, independent of the `Display` message, for
    /// surfaces that need a string `kind` tag (e.g. RPC-shaped responses).
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Wraps the error for a `kind`-tagged surface (spec.md §7's taxonomy
    /// boundary), matching [`ErrorWithKind`]'s "kind string for easier
    /// serialization" contract.
    pub fn into_error_with_kind(self) -> ErrorWithKind {
        let kind = self.kind();
        ErrorWithKind { kind, error: anyhow::Error::new(self) }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("cannot Set a nil value")]
    NilValue,
    #[error("tree I/O error: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("record not found")]
    NotFound,
    #[error("kv I/O error: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushPoolError {
    #[error("push pool is full")]
    Full,
    #[error("rejected: pool has existing reference with a lower nonce")]
    StaleNonce,
    #[error("rejected: pool has a pending push with a higher or equal fee for reference {reference} of repo {repo}")]
    InferiorFeeSingle { repo: String, reference: String },
    #[error("replace-by-fee on multiple push notes not allowed due to inferior fee")]
    InferiorFeeMulti,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackfileError {
    #[error("repo is required")]
    RepoRequired,
    #[error("blob object exceeds the maximum allowed push file size")]
    BlobTooLarge,
    #[error("malformed reference-update request: {0}")]
    MalformedReferenceUpdateRequest(String),
    #[error("packfile parse error: {0}")]
    Parse(String),
    #[error("I/O error: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MinerError {
    #[error("miner is already running")]
    AlreadyRunning,
    #[error("node is syncing")]
    ErrNodeSyncing,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnouncerError {
    #[error("announcement retries exhausted for key {0}")]
    RetriesExhausted(String),
}

impl From<std::io::Error> for NodeError {
    fn from(value: std::io::Error) -> Self {
        NodeError::Other(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_and_independent_of_display_message() {
        let a = NodeError::NamespaceDomainNotFound("d1".into());
        let b = NodeError::NamespaceDomainNotFound("d2".into());
        assert_eq!(a.kind(), "NamespaceDomainNotFound");
        assert_eq!(a.kind(), b.kind());
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn into_error_with_kind_carries_the_variant_name() {
        let wrapped = NodeError::ErrTxNotFound.into_error_with_kind();
        assert_eq!(wrapped.kind, "ErrTxNotFound");
    }
}
