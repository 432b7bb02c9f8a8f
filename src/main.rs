//! Offline rewards tree generator.
//!
//! Replays captured chain data and writes the interval's artifacts:
//! ```bash
//! RUST_LOG=rewards=debug rewards-tree chain.json 12 ./out
//! ```
//!
//! Checkpoints are kept under `<out>/checkpoints`, so a second run over the
//! same data resumes from the last one instead of rescanning the interval.

use eyre::{bail, WrapErr};
use rewards_tree::{
    chain::ChainData, FileCheckpointStore, GeneratorConfig, MemoryChain, TreeGenerator,
    ZstdJsonCodec,
};
use std::{fs, path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: rewards-tree <chain-data.json> <interval> [out-dir]";

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (Some(fixture), Some(index)) = (args.get(1), args.get(2)) else {
        bail!(USAGE);
    };
    let index: u64 = index.parse().wrap_err_with(|| format!("invalid interval {index}"))?;
    let out_dir = args.get(3).map_or_else(|| PathBuf::from("."), PathBuf::from);

    let raw = fs::read(fixture).wrap_err_with(|| format!("reading {fixture}"))?;
    let data: ChainData = serde_json::from_slice(&raw).wrap_err("decoding chain data")?;
    let chain = Arc::new(MemoryChain::from_data(data));
    let store = FileCheckpointStore::open(out_dir.join("checkpoints"))?;

    let generator = TreeGenerator::new(chain, store, GeneratorConfig::default());
    let tree = generator.generate(index, &ZstdJsonCodec::default()).await?;
    let (reward, performance) = tree.artifacts.write_to(&out_dir)?;

    info!(
        index,
        root = %tree.root,
        reward = %reward.display(),
        performance = %performance.display(),
        "Done"
    );
    println!("{}", tree.root);
    Ok(())
}
