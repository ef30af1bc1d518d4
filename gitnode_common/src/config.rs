use clap::Parser;

/// Node boot configuration, parsed once from the command line. This is the
/// ambient "config layer" the teacher provides via `clap`; the smart-protocol
/// transport and RPC surface themselves stay out of scope per spec.md §1.
#[derive(Parser, Debug, Clone)]
#[command(name = "gitnode", about = "A node for a decentralized git-hosting blockchain")]
pub struct NodeConfig {
    /// Directory holding the authenticated tree and kv store data files.
    #[arg(long, default_value = "./data")]
    pub data_dir: String,

    /// Network tag (mainnet/testnet/devnet), used only for address/log
    /// formatting — no behavior branches on it in the core.
    #[arg(long, default_value = "devnet")]
    pub network: String,

    #[arg(long, default_value_t = 120)]
    pub blocks_per_epoch: u64,

    #[arg(long, default_value_t = 5 * 1024 * 1024 * 1024)]
    pub max_repo_size: u64,

    #[arg(long, default_value_t = 500 * 1024 * 1024)]
    pub max_push_file_size: u64,

    /// Number of CPU miner worker threads; 0 disables mining.
    #[arg(long, default_value_t = 1)]
    pub miner_threads: usize,

    /// Hex-encoded 32-byte miner signing key seed. Absent disables mining.
    #[arg(long)]
    pub miner_key: Option<String>,

    #[arg(long, default_value_t = false)]
    pub schedule_mining_start: bool,
}

impl NodeConfig {
    pub fn from_args() -> Self {
        Self::parse()
    }
}
