//! Cluster member binary

use clap::Parser;
use raftkv::common::parse_peers;
use raftkv::{Config, Node};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "raftkv-server")]
#[command(about = "raftkv cluster member")]
#[command(version)]
struct Cli {
    /// Configuration file (.toml or .yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node ID (positive integer)
    #[arg(long)]
    id: Option<u64>,

    /// Address serving clients and peers
    #[arg(long)]
    addr: Option<String>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Other members, as id=addr pairs separated by commas
    #[arg(long)]
    peers: Option<String>,

    /// Start an election immediately
    #[arg(long)]
    bootstrap: bool,

    /// Join an existing cluster; --peers lists its initial members
    #[arg(long)]
    join: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file and environment, then override with CLI arguments
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(id) = cli.id {
        config.server.node_id = id;
    }
    if let Some(addr) = cli.addr {
        config.server.addr = addr;
    }
    if let Some(data_dir) = cli.data_dir {
        config.server.data_dir = data_dir;
    }
    if let Some(peers) = cli.peers {
        config.raft.peers = parse_peers(&peers)?;
    }
    config.raft.bootstrap |= cli.bootstrap;
    config.raft.join |= cli.join;
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let node = Node::start(config)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down node {}", node.id());
    node.shutdown();

    Ok(())
}
