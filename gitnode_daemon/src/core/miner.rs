//! CPU miner (spec.md §4.5): parallel worker tasks searching for a nonce
//! whose PoW hash is at or under the epoch's difficulty target, submitting
//! a winning nonce to the mempool as a `TxSubmitWork` transaction. Node
//! syncing status is read through an external service per spec.md §6; this
//! module only owns the search loop, hashrate measurement, and start/stop
//! lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use gitnode_common::crypto::{Address, Hash, KeyPair};
use gitnode_common::params;
use gitnode_common::transaction::{SubmitWorkPayload, Transaction, TransactionPayload};
use primitive_types::U256;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::core::epoch::{epoch_of, first_in_epoch};
use crate::core::error::MinerError;
use crate::core::keepers::system::SystemKeeper;
use crate::core::mempool::Mempool;

/// External node-syncing check (spec.md §4.5 "check node-syncing via an
/// external service"); out of scope as a concrete implementation per
/// spec.md §1.
pub trait SyncChecker: Send + Sync {
    fn is_syncing(&self) -> bool;
}

pub struct NeverSyncing;

impl SyncChecker for NeverSyncing {
    fn is_syncing(&self) -> bool {
        false
    }
}

/// Builds the 60-byte PoW seed buffer with the address/hash overlap
/// preserved exactly as spec.md §9 describes: the 20-byte address write
/// lands at offset 0 (its "intended" offset 32 is never written), clobbering
/// the first 20 bytes of the 32-byte epoch hash that was copied in first.
fn pow_seed(epoch_hash: &Hash, address: &Address, nonce: u64) -> [u8; 60] {
    let mut buf = [0u8; 60];
    buf[0..32].copy_from_slice(epoch_hash.as_bytes());
    buf[0..20].copy_from_slice(address.as_bytes());
    buf[52..60].copy_from_slice(&nonce.to_le_bytes());
    buf
}

fn pow_hash(epoch_hash: &Hash, address: &Address, nonce: u64) -> Hash {
    Hash::hash(&pow_seed(epoch_hash, address, nonce))
}

/// `target = 2^256 / difficulty` (SPEC_FULL.md "PoW hash-to-target
/// comparison").
fn target_for_difficulty(difficulty: u64) -> U256 {
    if difficulty <= 1 {
        U256::MAX
    } else {
        U256::MAX / U256::from(difficulty)
    }
}

fn hash_meets_target(hash: &Hash, target: U256) -> bool {
    U256::from_big_endian(hash.as_bytes()) <= target
}

/// Returns true exactly when `mine` would have accepted the same inputs
/// (spec.md §8 "`VerifyWork`").
pub fn verify_work(epoch_hash: &Hash, address: &Address, nonce: u64, difficulty: u64) -> bool {
    hash_meets_target(&pow_hash(epoch_hash, address, nonce), target_for_difficulty(difficulty))
}

struct HashrateMeter {
    hashes_since_tick: AtomicU64,
    rate_milli_hz: AtomicU64,
}

impl HashrateMeter {
    fn new() -> Self {
        Self { hashes_since_tick: AtomicU64::new(0), rate_milli_hz: AtomicU64::new(0) }
    }

    fn record(&self) {
        self.hashes_since_tick.fetch_add(1, Ordering::Relaxed);
    }

    /// Moving average over a 5s window, tick-only (spec.md §4.5, §5): each
    /// tick folds the count observed since the last tick into the running
    /// rate at a 1/5 weight.
    fn tick(&self, tick_period_secs: u64) {
        let count = self.hashes_since_tick.swap(0, Ordering::Relaxed);
        let instantaneous_milli_hz = (count * 1000) / tick_period_secs.max(1);
        let prior = self.rate_milli_hz.load(Ordering::Relaxed);
        let updated = prior + (instantaneous_milli_hz as i64 - prior as i64) / 5;
        self.rate_milli_hz.store(updated.max(0) as u64, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.hashes_since_tick.store(0, Ordering::Relaxed);
        self.rate_milli_hz.store(0, Ordering::Relaxed);
    }

    fn rate_per_second(&self) -> f64 {
        self.rate_milli_hz.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

pub struct Miner {
    system: Arc<dyn SystemKeeper>,
    mempool: Arc<dyn Mempool>,
    sync_checker: Arc<dyn SyncChecker>,
    key_pair: Arc<KeyPair>,
    address: Address,
    blocks_per_epoch: u64,
    running: Arc<AtomicBool>,
    stop: Arc<Notify>,
    hashrate: Arc<HashrateMeter>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Miner {
    pub fn new(
        system: Arc<dyn SystemKeeper>,
        mempool: Arc<dyn Mempool>,
        sync_checker: Arc<dyn SyncChecker>,
        key_pair: KeyPair,
        blocks_per_epoch: u64,
    ) -> Self {
        let address = key_pair.public_key().to_address();
        Self {
            system,
            mempool,
            sync_checker,
            key_pair: Arc::new(key_pair),
            address,
            blocks_per_epoch,
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(Notify::new()),
            hashrate: Arc::new(HashrateMeter::new()),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn is_mining(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn hashrate_per_second(&self) -> f64 {
        self.hashrate.rate_per_second()
    }

    /// spec.md §4.5 "`Start(scheduleStart)`".
    pub async fn start(self: &Arc<Self>, threads: usize, schedule_start: bool) -> Result<(), MinerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            self.running.store(true, Ordering::SeqCst);
            return Err(MinerError::AlreadyRunning);
        }

        if self.sync_checker.is_syncing() {
            if !schedule_start {
                self.running.store(false, Ordering::SeqCst);
                return Err(MinerError::ErrNodeSyncing);
            }
            let this = self.clone();
            let retry_task = tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(params::miner_retry_interval_secs()));
                loop {
                    interval.tick().await;
                    if !this.sync_checker.is_syncing() {
                        this.spawn_workers(threads);
                        break;
                    }
                }
            });
            self.workers.lock().expect("miner lock poisoned").push(retry_task);
            return Ok(());
        }

        self.spawn_workers(threads);
        Ok(())
    }

    fn spawn_workers(self: &Arc<Self>, threads: usize) {
        let meter = self.hashrate.clone();
        let tick_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                interval.tick().await;
                meter.tick(5);
            }
        });
        self.workers.lock().expect("miner lock poisoned").push(tick_task);

        for _ in 0..threads.max(1) {
            let this = self.clone();
            let handle = tokio::spawn(async move { this.worker_loop().await });
            self.workers.lock().expect("miner lock poisoned").push(handle);
        }
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            let stopped = tokio::select! {
                _ = self.stop.notified() => true,
                _ = self.search_one_session() => false,
            };
            if stopped {
                return;
            }
        }
    }

    /// One search session: fetch chain tip, compute epoch seed, iterate
    /// nonces from a random start until a win or cancellation (spec.md
    /// §4.5 "Search loop").
    async fn search_one_session(&self) {
        let Ok(last) = self.system.get_last_block_info().await else { return };
        let epoch = epoch_of(last.height, self.blocks_per_epoch);
        let epoch_start_height = first_in_epoch(epoch, self.blocks_per_epoch);
        let Ok(epoch_block) = self.system.get_block_info(epoch_start_height).await else { return };
        let Ok(difficulty) = self.system.get_current_difficulty().await else { return };
        let target = target_for_difficulty(difficulty);

        let mut nonce: u64 = rand::random();
        loop {
            let hash = pow_hash(&epoch_block.hash, &self.address, nonce);
            self.hashrate.record();

            if hash_meets_target(&hash, target) {
                if let Err(e) = self.system.register_work_nonce(epoch, nonce).await {
                    log::warn!("miner: failed to register work nonce: {e}");
                }
                let tx = self.build_submit_work_tx(epoch, nonce);
                if let Err(e) = self.mempool.add_tx(tx).await {
                    log::warn!("miner: submit-work tx rejected: {e}");
                }
                return;
            }

            nonce = nonce.wrapping_add(1);
            if nonce % 4096 == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    fn build_submit_work_tx(&self, epoch: u64, nonce: u64) -> Transaction {
        let mut tx = Transaction {
            sender: self.key_pair.public_key(),
            nonce: 0,
            fee: 0,
            payload: TransactionPayload::SubmitWork(SubmitWorkPayload { epoch, nonce }),
            signature: gitnode_common::crypto::Signature::zero(),
        };
        tx.signature = self.key_pair.sign(&tx.signing_bytes());
        tx
    }

    /// spec.md §4.5 "`Stop()`".
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().expect("miner lock poisoned").drain(..).collect();
        for handle in handles {
            handle.abort();
        }
        self.hashrate.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keepers::system::TreeSystemKeeper;
    use crate::core::mempool::InMemoryMempool;
    use crate::core::storage::Storage;
    use gitnode_common::block_info::BlockInfo;
    use rand::rngs::OsRng;

    struct AlwaysSyncing;
    impl SyncChecker for AlwaysSyncing {
        fn is_syncing(&self) -> bool {
            true
        }
    }

    fn miner() -> Arc<Miner> {
        let storage = Arc::new(Storage::new());
        let system: Arc<dyn SystemKeeper> = Arc::new(TreeSystemKeeper::new(storage, 120));
        let mempool: Arc<dyn Mempool> = Arc::new(InMemoryMempool::new());
        let key_pair = KeyPair::generate(&mut OsRng);
        Arc::new(Miner::new(system, mempool, Arc::new(NeverSyncing), key_pair, 120))
    }

    #[tokio::test]
    async fn start_twice_reports_already_running() {
        let miner = miner();
        miner.start(1, false).await.unwrap();
        let err = miner.start(1, false).await.unwrap_err();
        assert!(matches!(err, MinerError::AlreadyRunning));
        miner.stop().await;
    }

    #[tokio::test]
    async fn syncing_without_schedule_fails_fast() {
        let storage = Arc::new(Storage::new());
        let system: Arc<dyn SystemKeeper> = Arc::new(TreeSystemKeeper::new(storage, 120));
        let mempool: Arc<dyn Mempool> = Arc::new(InMemoryMempool::new());
        let key_pair = KeyPair::generate(&mut OsRng);
        let miner = Arc::new(Miner::new(system, mempool, Arc::new(AlwaysSyncing), key_pair, 120));

        let err = miner.start(1, false).await.unwrap_err();
        assert!(matches!(err, MinerError::ErrNodeSyncing));
        assert!(!miner.is_mining());
    }

    #[test]
    fn verify_work_agrees_with_the_same_hash_comparison() {
        let epoch_hash = Hash::hash(b"epoch-1");
        let address = Address::new([7u8; 20]);
        let target = target_for_difficulty(1);
        let mut nonce = 0u64;
        while !hash_meets_target(&pow_hash(&epoch_hash, &address, nonce), target) {
            nonce += 1;
            if nonce > 1_000_000 {
                break;
            }
        }
        assert!(verify_work(&epoch_hash, &address, nonce, 1));
        assert!(!verify_work(&epoch_hash, &address, nonce.wrapping_add(1), u64::MAX));
    }

    #[test]
    fn seed_buffer_overlap_matches_spec_anomaly() {
        let epoch_hash = Hash::hash(b"epoch-1");
        let address = Address::new([9u8; 20]);
        let buf = pow_seed(&epoch_hash, &address, 42);
        assert_eq!(&buf[0..20], address.as_bytes());
        assert_eq!(&buf[20..32], &epoch_hash.as_bytes()[20..32]);
        assert_eq!(&buf[32..52], &[0u8; 20]);
        assert_eq!(&buf[52..60], &42u64.to_le_bytes());
    }
}
