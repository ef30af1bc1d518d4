//! Process-wide tunables (spec.md §9 "Global mutable state").
//!
//! These are plain `AtomicU64`/`AtomicUsize` cells instead of a config
//! struct threaded through every call because the teacher's own constants
//! (`NumBlocksPerEpoch`-shaped values) are read from deep call stacks
//! (keepers, pool, miner) that would otherwise all need a config handle.
//! `init_from` is called exactly once at node boot; tests that need a
//! different value mutate the cell directly under `#[cfg(test)]`, never in
//! production code paths.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub struct Params {
    pub num_blocks_per_epoch: AtomicU64,
    pub max_repo_size: AtomicU64,
    pub max_push_file_size: AtomicU64,
    pub push_pool_item_ttl_secs: AtomicU64,
    pub push_pool_cleanup_interval_secs: AtomicU64,
    pub push_pool_capacity: AtomicUsize,
    pub min_difficulty: AtomicU64,
    pub difficulty_change_pct: AtomicU64,
    pub miner_threads: AtomicUsize,
    pub miner_retry_interval_secs: AtomicU64,
    pub announcer_max_retry: AtomicUsize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            num_blocks_per_epoch: AtomicU64::new(120),
            max_repo_size: AtomicU64::new(5 * 1024 * 1024 * 1024),
            max_push_file_size: AtomicU64::new(500 * 1024 * 1024),
            push_pool_item_ttl_secs: AtomicU64::new(60 * 60),
            push_pool_cleanup_interval_secs: AtomicU64::new(60),
            push_pool_capacity: AtomicUsize::new(2000),
            min_difficulty: AtomicU64::new(1),
            difficulty_change_pct: AtomicU64::new(10),
            miner_threads: AtomicUsize::new(1),
            miner_retry_interval_secs: AtomicU64::new(60),
            announcer_max_retry: AtomicUsize::new(3),
        }
    }
}

lazy_static::lazy_static! {
    pub static ref PARAMS: Params = Params::default();
}

pub fn num_blocks_per_epoch() -> u64 {
    PARAMS.num_blocks_per_epoch.load(Ordering::Relaxed)
}

pub fn max_repo_size() -> u64 {
    PARAMS.max_repo_size.load(Ordering::Relaxed)
}

pub fn max_push_file_size() -> u64 {
    PARAMS.max_push_file_size.load(Ordering::Relaxed)
}

pub fn push_pool_item_ttl_secs() -> u64 {
    PARAMS.push_pool_item_ttl_secs.load(Ordering::Relaxed)
}

pub fn push_pool_cleanup_interval_secs() -> u64 {
    PARAMS.push_pool_cleanup_interval_secs.load(Ordering::Relaxed)
}

pub fn push_pool_capacity() -> usize {
    PARAMS.push_pool_capacity.load(Ordering::Relaxed)
}

pub fn min_difficulty() -> u64 {
    PARAMS.min_difficulty.load(Ordering::Relaxed)
}

pub fn difficulty_change_pct() -> u64 {
    PARAMS.difficulty_change_pct.load(Ordering::Relaxed)
}

pub fn miner_threads() -> usize {
    PARAMS.miner_threads.load(Ordering::Relaxed)
}

pub fn miner_retry_interval_secs() -> u64 {
    PARAMS.miner_retry_interval_secs.load(Ordering::Relaxed)
}

pub fn announcer_max_retry() -> usize {
    PARAMS.announcer_max_retry.load(Ordering::Relaxed)
}

/// Applied once at boot from the parsed `NodeConfig`.
pub fn init_from(cfg: &crate::config::NodeConfig) {
    PARAMS.num_blocks_per_epoch.store(cfg.blocks_per_epoch, Ordering::Relaxed);
    PARAMS.max_repo_size.store(cfg.max_repo_size, Ordering::Relaxed);
    PARAMS.max_push_file_size.store(cfg.max_push_file_size, Ordering::Relaxed);
    PARAMS.miner_threads.store(cfg.miner_threads, Ordering::Relaxed);
}
