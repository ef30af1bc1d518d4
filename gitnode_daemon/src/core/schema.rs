//! Deterministic byte keys with tag prefixes and length-stable height
//! encodings (spec.md §4.1, §6 "Keys (persisted format)").
//!
//! All keys are `tag | ":" | payload`. Heights/nonces embedded in a key use
//! `uint64_be` so lexicographic order matches numeric order, which is what
//! lets `Iterate(prefix, ...)` return ascending-height scans for free.

use gitnode_common::serializer::uint64_be;

pub const SEP: u8 = b':';

pub const TAG_ACCOUNT: &str = "a";
pub const TAG_REPO: &str = "r";
pub const TAG_NAMESPACE: &str = "n";
pub const TAG_PUSH_KEY: &str = "g";
pub const TAG_PUSH_KEY_ADDRESS_INDEX: &str = "ag";
pub const TAG_BLOCK_INFO: &str = "b";
pub const TAG_VALIDATORS: &str = "v";
pub const TAG_TX: &str = "t";
pub const TAG_TRACKED_REPO: &str = "tr";
pub const TAG_REPO_REF_SYNC_HEIGHT: &str = "rr";
pub const TAG_ANNOUNCE_LIST: &str = "al";
pub const TAG_POW_NONCES: &str = "pw";
pub const TAG_DIFFICULTY: &str = "df";

// kv-only auxiliary tags used by the repository keeper's indexes.
pub const TAG_REPO_PROPOSAL_VOTE: &str = "rpv";
pub const TAG_REPO_PROPOSAL_END_HEIGHT: &str = "rpe";
pub const TAG_REPO_PROPOSAL_CLOSED: &str = "rpc";
pub const TAG_REPO_CREATED_BY: &str = "rca";

fn push_tag(buf: &mut Vec<u8>, tag: &str) {
    buf.extend_from_slice(tag.as_bytes());
    buf.push(SEP);
}

pub fn account_key(address: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + address.len());
    push_tag(&mut buf, TAG_ACCOUNT);
    buf.extend_from_slice(address);
    buf
}

pub fn repo_key(name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + name.len());
    push_tag(&mut buf, TAG_REPO);
    buf.extend_from_slice(name.as_bytes());
    buf
}

pub fn namespace_key(hashed_name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + hashed_name.len());
    push_tag(&mut buf, TAG_NAMESPACE);
    buf.extend_from_slice(hashed_name);
    buf
}

pub fn push_key_key(key_id: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + key_id.len());
    push_tag(&mut buf, TAG_PUSH_KEY);
    buf.extend_from_slice(key_id.as_bytes());
    buf
}

pub fn push_key_address_index_key(address: &[u8], key_id: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_PUSH_KEY_ADDRESS_INDEX);
    buf.extend_from_slice(address);
    buf.push(SEP);
    buf.extend_from_slice(key_id.as_bytes());
    buf
}

pub fn push_key_address_index_prefix(address: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_PUSH_KEY_ADDRESS_INDEX);
    buf.extend_from_slice(address);
    buf.push(SEP);
    buf
}

pub fn block_info_key(height: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    push_tag(&mut buf, TAG_BLOCK_INFO);
    buf.extend_from_slice(&uint64_be(height));
    buf
}

pub fn block_info_prefix() -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_BLOCK_INFO);
    buf
}

pub fn validators_key(height: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    push_tag(&mut buf, TAG_VALIDATORS);
    buf.extend_from_slice(&uint64_be(height));
    buf
}

pub fn validators_prefix() -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_VALIDATORS);
    buf
}

pub fn tx_key(hash: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + hash.len());
    push_tag(&mut buf, TAG_TX);
    buf.extend_from_slice(hash);
    buf
}

pub fn tracked_repo_key(name: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_TRACKED_REPO);
    buf.extend_from_slice(name.as_bytes());
    buf
}

pub fn tracked_repo_prefix() -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_TRACKED_REPO);
    buf
}

pub fn repo_ref_sync_height_key(repo: &str, reference: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_REPO_REF_SYNC_HEIGHT);
    buf.extend_from_slice(repo.as_bytes());
    buf.push(SEP);
    buf.extend_from_slice(reference.as_bytes());
    buf
}

/// `"al"|":"|uint64BE(nextTime)|":"|key` — iteration with this prefix
/// therefore yields soonest-first ordering (spec.md §9 "Announce-list key
/// ordering": preserve soonest-first even where the source iterates with
/// `reverse=true`, since the fixed-width big-endian encoding already does
/// the work for a forward scan).
pub fn announce_list_key(scheduled_time: u64, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(11 + key.len());
    push_tag(&mut buf, TAG_ANNOUNCE_LIST);
    buf.extend_from_slice(&uint64_be(scheduled_time));
    buf.push(SEP);
    buf.extend_from_slice(key);
    buf
}

pub fn announce_list_prefix() -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_ANNOUNCE_LIST);
    buf
}

/// Splits an announce-list key back into `(scheduled_time, object_key)`.
pub fn split_announce_list_key(key: &[u8]) -> Option<(u64, Vec<u8>)> {
    let prefix = announce_list_prefix();
    let rest = key.strip_prefix(prefix.as_slice())?;
    if rest.len() < 8 {
        return None;
    }
    let time = gitnode_common::serializer::read_uint64_be(&rest[..8])?;
    let object_key = rest[9..].to_vec(); // skip the separator byte
    Some((time, object_key))
}

pub fn pow_nonces_key(epoch: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    push_tag(&mut buf, TAG_POW_NONCES);
    buf.extend_from_slice(&uint64_be(epoch));
    buf
}

pub fn difficulty_key() -> Vec<u8> {
    TAG_DIFFICULTY.as_bytes().to_vec()
}

pub fn repo_proposal_vote_key(repo: &str, proposal_id: &str, voter: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_REPO_PROPOSAL_VOTE);
    buf.extend_from_slice(repo.as_bytes());
    buf.push(SEP);
    buf.extend_from_slice(proposal_id.as_bytes());
    buf.push(SEP);
    buf.extend_from_slice(voter);
    buf
}

pub fn repo_proposal_end_height_key(end_height: u64, repo: &str, proposal_id: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_REPO_PROPOSAL_END_HEIGHT);
    buf.extend_from_slice(&uint64_be(end_height));
    buf.push(SEP);
    buf.extend_from_slice(repo.as_bytes());
    buf.push(SEP);
    buf.extend_from_slice(proposal_id.as_bytes());
    buf
}

pub fn repo_proposal_end_height_prefix() -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_REPO_PROPOSAL_END_HEIGHT);
    buf
}

pub fn repo_proposal_closed_key(repo: &str, proposal_id: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_REPO_PROPOSAL_CLOSED);
    buf.extend_from_slice(repo.as_bytes());
    buf.push(SEP);
    buf.extend_from_slice(proposal_id.as_bytes());
    buf
}

pub fn repo_created_by_key(address: &[u8], repo: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_REPO_CREATED_BY);
    buf.extend_from_slice(address);
    buf.push(SEP);
    buf.extend_from_slice(repo.as_bytes());
    buf
}

pub fn repo_created_by_prefix(address: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    push_tag(&mut buf, TAG_REPO_CREATED_BY);
    buf.extend_from_slice(address);
    buf.push(SEP);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_keys_sort_numerically() {
        let mut keys = vec![block_info_key(250), block_info_key(3), block_info_key(10)];
        keys.sort();
        assert_eq!(keys, vec![block_info_key(3), block_info_key(10), block_info_key(250)]);
    }

    #[test]
    fn announce_list_key_roundtrips() {
        let key = announce_list_key(42, b"obj");
        let (time, obj) = split_announce_list_key(&key).unwrap();
        assert_eq!(time, 42);
        assert_eq!(obj, b"obj");
    }
}
