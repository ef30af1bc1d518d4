//! Node entry point. Boots the storage-backed keepers, the push pool, the
//! mempool, the announcer session, and (if configured) the CPU miner.
//!
//! The TCP/HTTP smart-protocol transport that would drive
//! [`gitnode_daemon::core::push_handler::PushHandler`] per incoming
//! connection is an external collaborator out of scope here (spec.md §1,
//! §6) — this binary only brings up the long-lived components a transport
//! would sit in front of, the same way the teacher's daemon separates
//! `main.rs` wiring from the RPC surface that consumes it.

use std::sync::Arc;

use gitnode_common::config::NodeConfig;
use gitnode_common::crypto::KeyPair;
use gitnode_common::{logging, params};
use gitnode_daemon::core::dht_client::RecordingDht;
use gitnode_daemon::core::keepers::Keepers;
use gitnode_daemon::core::mempool::InMemoryMempool;
use gitnode_daemon::core::miner::{Miner, NeverSyncing};
use gitnode_daemon::core::policy::PermissiveEnforcer;
use gitnode_daemon::core::push_pool::PushPool;
use gitnode_daemon::core::remote::{LocalRemoteServer, NodeCfg};
use gitnode_daemon::core::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = NodeConfig::from_args();
    logging::init(false).map_err(|e| anyhow::anyhow!(e))?;
    params::init_from(&cfg);

    log::info!("starting gitnode ({} network, data dir {})", cfg.network, cfg.data_dir);

    let storage = Arc::new(Storage::new());
    let keepers = Keepers::new_tree_backed(storage, cfg.blocks_per_epoch);

    let push_pool = Arc::new(PushPool::with_default_capacity());
    let _cleanup_task = push_pool.clone().spawn_cleanup_task();

    let mempool: Arc<dyn gitnode_daemon::core::mempool::Mempool> = Arc::new(InMemoryMempool::new());

    let validator_key = KeyPair::generate(&mut rand::rngs::OsRng);
    let remote = Arc::new(LocalRemoteServer::new(
        push_pool.clone(),
        Arc::new(PermissiveEnforcer),
        Arc::new(RecordingDht::new()),
        keepers.push_key.clone(),
        validator_key,
        NodeCfg { max_repo_size: cfg.max_repo_size, max_push_file_size: cfg.max_push_file_size },
    ));

    let announcer = gitnode_daemon::core::announcer::AnnouncerSession::new(keepers.dht.clone(), remote.get_dht());
    let reannounce_session = announcer.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            reannounce_session.reannounce().await;
        }
    });

    if cfg.miner_threads > 0 {
        let Some(seed_hex) = cfg.miner_key.as_deref() else {
            log::warn!("miner-threads > 0 but no --miner-key given; mining disabled");
            return run_forever().await;
        };
        let mut seed = [0u8; 32];
        hex::decode_to_slice(seed_hex, &mut seed).map_err(|e| anyhow::anyhow!("invalid --miner-key: {e}"))?;
        let miner_key = KeyPair::from_bytes(seed);

        let miner = Arc::new(Miner::new(keepers.system.clone(), mempool.clone(), Arc::new(NeverSyncing), miner_key, cfg.blocks_per_epoch));
        miner.start(cfg.miner_threads, cfg.schedule_mining_start).await?;
        log::info!("miner started with {} thread(s)", cfg.miner_threads);
    }

    run_forever().await
}

async fn run_forever() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    Ok(())
}
