//! Push pool with replace-by-fee (spec.md §4.6): orders push notes by fee,
//! enforces a `(repo, reference-name)` uniqueness invariant per §3, and
//! evicts stale entries on a TTL. Push-pool operations take a single mutex
//! (spec.md §5): a read-lock shape for `full`/`len`, write-lock elsewhere —
//! modeled here with one `Mutex` since the pool's hot path is already a
//! handful of map lookups, not a long-held critical section.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use gitnode_common::crypto::Hash;
use gitnode_common::push_note::PushNote;
use indexmap::IndexMap;
use lru::LruCache;

use gitnode_common::params;

use crate::core::error::PushPoolError;

struct PooledNote {
    note: PushNote,
    time_added: Instant,
}

struct PoolInner {
    /// note id -> pooled note, insertion order preserved for `Len`-adjacent
    /// diagnostics (not relied on for correctness).
    notes: IndexMap<Hash, PooledNote>,
    /// `(repo, refName) -> note id`; at most one entry per key (spec.md §3
    /// "Push-pool reference-key uniqueness").
    ref_index: HashMap<(String, String), Hash>,
    recently_seen: LruCache<Hash, ()>,
}

pub struct PushPool {
    inner: Mutex<PoolInner>,
    capacity: usize,
}

impl PushPool {
    pub fn new(capacity: usize) -> Self {
        let seen_capacity = std::num::NonZeroUsize::new(capacity.saturating_mul(2).max(1)).unwrap();
        Self {
            inner: Mutex::new(PoolInner {
                notes: IndexMap::new(),
                ref_index: HashMap::new(),
                recently_seen: LruCache::new(seen_capacity),
            }),
            capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(params::push_pool_capacity())
    }

    /// spec.md §4.6 "Add(note)".
    pub fn add(&self, note: PushNote) -> Result<(), PushPoolError> {
        let mut inner = self.inner.lock().expect("push pool lock poisoned");

        if inner.notes.len() >= self.capacity {
            return Err(PushPoolError::Full);
        }

        let note_id = note.id();
        if inner.notes.contains_key(&note_id) {
            return Ok(());
        }

        let new_fee_rate = note.fee_rate();
        let mut replaceable_ids: HashSet<Hash> = HashSet::new();
        let mut replaceable_total_fee_rate: f64 = 0.0;

        for pushed_ref in &note.references {
            let ref_key = (note.repo_name.clone(), pushed_ref.name.clone());
            let Some(existing_id) = inner.ref_index.get(&ref_key).copied() else {
                continue; // fresh reference, nothing to contest
            };
            let existing_note = &inner.notes.get(&existing_id).expect("ref_index out of sync with notes").note;
            let existing_ref = existing_note
                .references
                .iter()
                .find(|r| r.name == pushed_ref.name)
                .expect("pooled note indexed under a ref it doesn't carry");

            if existing_ref.nonce > pushed_ref.nonce {
                return Err(PushPoolError::StaleNonce);
            }

            let existing_fee_rate = existing_note.fee_rate();
            if existing_fee_rate >= new_fee_rate {
                return Err(PushPoolError::InferiorFeeSingle {
                    repo: note.repo_name.clone(),
                    reference: pushed_ref.name.clone(),
                });
            }

            if replaceable_ids.insert(existing_id) {
                replaceable_total_fee_rate += existing_fee_rate;
            }
        }

        if !replaceable_ids.is_empty() && replaceable_total_fee_rate >= new_fee_rate {
            return Err(PushPoolError::InferiorFeeMulti);
        }

        for id in &replaceable_ids {
            Self::remove_note_locked(&mut inner, id);
        }

        Self::insert_note_locked(&mut inner, note);
        Ok(())
    }

    fn insert_note_locked(inner: &mut PoolInner, note: PushNote) {
        let note_id = note.id();
        for pushed_ref in &note.references {
            inner.ref_index.insert((note.repo_name.clone(), pushed_ref.name.clone()), note_id);
        }
        inner.recently_seen.put(note_id, ());
        inner.notes.insert(note_id, PooledNote { note, time_added: Instant::now() });
        metrics::gauge!("push_pool_size").set(inner.notes.len() as f64);
    }

    fn remove_note_locked(inner: &mut PoolInner, note_id: &Hash) {
        if let Some(pooled) = inner.notes.shift_remove(note_id) {
            for pushed_ref in &pooled.note.references {
                let key = (pooled.note.repo_name.clone(), pushed_ref.name.clone());
                if inner.ref_index.get(&key) == Some(note_id) {
                    inner.ref_index.remove(&key);
                }
            }
            metrics::gauge!("push_pool_size").set(inner.notes.len() as f64);
        }
        // `recently_seen` is intentionally left untouched: HasSeen must stay
        // true for a while after removal (spec.md §3, §8).
    }

    pub fn remove(&self, note_id: &Hash) {
        let mut inner = self.inner.lock().expect("push pool lock poisoned");
        Self::remove_note_locked(&mut inner, note_id);
    }

    pub fn get(&self, note_id: &Hash) -> Option<PushNote> {
        let inner = self.inner.lock().expect("push pool lock poisoned");
        inner.notes.get(note_id).map(|p| p.note.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("push pool lock poisoned").notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn has_seen(&self, note_id: &Hash) -> bool {
        self.inner.lock().expect("push pool lock poisoned").recently_seen.contains(note_id)
    }

    /// Current nonce recorded for `(repo, refName)` in the pool, or 0 if no
    /// note currently occupies that reference slot (spec.md §4.8 "Note
    /// creation": "next-nonce = current-ref-nonce+1").
    pub fn ref_nonce(&self, repo: &str, ref_name: &str) -> u64 {
        let inner = self.inner.lock().expect("push pool lock poisoned");
        let Some(note_id) = inner.ref_index.get(&(repo.to_string(), ref_name.to_string())) else {
            return 0;
        };
        inner
            .notes
            .get(note_id)
            .and_then(|pooled| pooled.note.references.iter().find(|r| r.name == ref_name))
            .map(|r| r.nonce)
            .unwrap_or(0)
    }

    /// spec.md §4.6 "Eviction": removes entries whose `TimeAdded` is older
    /// than `PushPoolItemTTL`.
    pub fn evict_expired(&self, ttl: Duration) {
        let mut inner = self.inner.lock().expect("push pool lock poisoned");
        let now = Instant::now();
        let expired: Vec<Hash> = inner
            .notes
            .iter()
            .filter(|(_, pooled)| now.duration_since(pooled.time_added) >= ttl)
            .map(|(id, _)| *id)
            .collect();
        if !expired.is_empty() {
            metrics::counter!("push_pool_evicted_total").increment(expired.len() as u64);
        }
        for id in expired {
            Self::remove_note_locked(&mut inner, &id);
        }
    }

    /// Spawns the background cleanup ticker (spec.md §4.6). The ticker
    /// starts immediately on construction; mutating `PushPoolItemTTL`
    /// after this call does not reset its period (spec.md §9, preserved
    /// as-is).
    pub fn spawn_cleanup_task(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(params::push_pool_cleanup_interval_secs());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let ttl = Duration::from_secs(params::push_pool_item_ttl_secs());
                self.evict_expired(ttl);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitnode_common::crypto::{Address, GitOid, PublicKey, Signature};
    use gitnode_common::push_note::PushedReference;

    fn reference(name: &str, fee: u64, nonce: u64) -> PushedReference {
        PushedReference {
            name: name.into(),
            old_hash: GitOid::zero(),
            new_hash: GitOid::new([1u8; 20]),
            nonce,
            merge_proposal_id: None,
            fee,
            value: 0,
            push_sig: Signature::zero(),
            data: vec![],
        }
    }

    fn note(repo: &str, refs: Vec<PushedReference>, salt: u8) -> PushNote {
        note_sized(repo, refs, salt, 100)
    }

    fn note_sized(repo: &str, refs: Vec<PushedReference>, salt: u8, size: u64) -> PushNote {
        PushNote {
            repo_name: repo.into(),
            namespace: String::new(),
            references: refs,
            pusher_key_id: "key1".into(),
            pusher_address: Address::zero(),
            size,
            timestamp: 0,
            pusher_account_nonce: 0,
            remote_node_signature: Signature::from_bytes([salt; 64]),
            creator_public_key: PublicKey::zero(),
        }
    }

    #[test]
    fn re_adding_same_note_is_a_no_op() {
        let pool = PushPool::new(10);
        let n = note("acme/repo", vec![reference("refs/heads/main", 5, 1)], 1);
        pool.add(n.clone()).unwrap();
        pool.add(n).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn equal_fee_rbf_is_rejected() {
        let pool = PushPool::new(10);
        let a = note("acme/repo", vec![reference("refs/heads/main", 5, 1)], 1);
        let b = note("acme/repo", vec![reference("refs/heads/main", 5, 2)], 2);
        pool.add(a).unwrap();
        let err = pool.add(b).unwrap_err();
        assert!(matches!(err, PushPoolError::InferiorFeeSingle { .. }));
    }

    #[test]
    fn strictly_higher_fee_replaces_existing_note() {
        let pool = PushPool::new(10);
        let a = note("acme/repo", vec![reference("refs/heads/main", 2, 1)], 1);
        let a_id = a.id();
        let b = note("acme/repo", vec![reference("refs/heads/main", 5, 2)], 2);
        pool.add(a).unwrap();
        pool.add(b).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.get(&a_id).is_none());
    }

    #[test]
    fn rbf_compares_fee_rate_not_raw_fee() {
        // `a` has a higher raw fee (100) but a much larger size, so its
        // fee-rate (0.1) is worse than `b`'s (50/100 = 0.5). RBF must key off
        // fee-rate, so `b` replaces `a` despite the lower raw fee.
        let pool = PushPool::new(10);
        let a = note_sized("acme/repo", vec![reference("refs/heads/main", 100, 1)], 1, 1000);
        let a_id = a.id();
        let b = note_sized("acme/repo", vec![reference("refs/heads/main", 50, 2)], 2, 100);
        pool.add(a).unwrap();
        pool.add(b).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.get(&a_id).is_none());
    }

    #[test]
    fn rbf_rejects_when_raw_fee_is_higher_but_fee_rate_is_not() {
        // Mirror image of the above: `b`'s raw fee (50) is lower than `a`'s
        // (100), but `b`'s fee-rate is still inferior once size is taken
        // into account, so it must be rejected.
        let pool = PushPool::new(10);
        let a = note_sized("acme/repo", vec![reference("refs/heads/main", 100, 1)], 1, 100);
        let b = note_sized("acme/repo", vec![reference("refs/heads/main", 50, 2)], 2, 1000);
        pool.add(a).unwrap();
        let err = pool.add(b).unwrap_err();
        assert!(matches!(err, PushPoolError::InferiorFeeSingle { .. }));
    }

    #[test]
    fn multi_ref_replace_rejected_when_combined_fee_not_exceeded() {
        let pool = PushPool::new(10);
        let y = note("acme/repo", vec![reference("refs/heads/master", 4, 1)], 1);
        let z = note("acme/repo", vec![reference("refs/heads/update", 4, 1)], 2);
        pool.add(y).unwrap();
        pool.add(z).unwrap();

        let x = note(
            "acme/repo",
            vec![reference("refs/heads/master", 6, 2), reference("refs/heads/update", 1, 2)],
            3,
        );
        let err = pool.add(x).unwrap_err();
        assert!(matches!(err, PushPoolError::InferiorFeeMulti));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn lower_nonce_than_pooled_is_rejected() {
        let pool = PushPool::new(10);
        let a = note("acme/repo", vec![reference("refs/heads/main", 2, 5)], 1);
        pool.add(a).unwrap();
        let b = note("acme/repo", vec![reference("refs/heads/main", 50, 1)], 2);
        let err = pool.add(b).unwrap_err();
        assert!(matches!(err, PushPoolError::StaleNonce));
    }

    #[test]
    fn full_pool_rejects_new_notes() {
        let pool = PushPool::new(1);
        pool.add(note("acme/repo", vec![reference("refs/heads/a", 1, 1)], 1)).unwrap();
        let err = pool.add(note("acme/repo2", vec![reference("refs/heads/b", 1, 1)], 2)).unwrap_err();
        assert!(matches!(err, PushPoolError::Full));
    }

    #[test]
    fn has_seen_stays_true_after_removal() {
        let pool = PushPool::new(10);
        let n = note("acme/repo", vec![reference("refs/heads/main", 1, 1)], 1);
        let id = n.id();
        pool.add(n).unwrap();
        pool.remove(&id);
        assert_eq!(pool.len(), 0);
        assert!(pool.has_seen(&id));
    }

    #[test]
    fn eviction_removes_entries_past_ttl() {
        let pool = PushPool::new(10);
        let n = note("acme/repo", vec![reference("refs/heads/main", 1, 1)], 1);
        let id = n.id();
        pool.add(n).unwrap();
        pool.evict_expired(Duration::from_secs(0));
        assert!(pool.get(&id).is_none());
        assert_eq!(pool.len(), 0);
    }
}
