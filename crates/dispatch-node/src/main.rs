//! dispatch-node — ring demo over an in-process group or a TCP mesh.
//!
//! ```bash
//! # Four ranks as threads of one process
//! RUST_LOG=info cargo run --bin dispatch-node -- local --ranks 4
//!
//! # Three processes, one per terminal (same peer list everywhere)
//! cargo run --bin dispatch-node -- tcp --rank 0 --peers 127.0.0.1:7100,127.0.0.1:7101,127.0.0.1:7102
//! cargo run --bin dispatch-node -- tcp --rank 1 --peers 127.0.0.1:7100,127.0.0.1:7101,127.0.0.1:7102
//! cargo run --bin dispatch-node -- tcp --rank 2 --peers 127.0.0.1:7100,127.0.0.1:7101,127.0.0.1:7102
//! ```

mod demo;

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dispatch_net::{LocalFabric, TcpTransport};
use dispatch_types::{EngineConfig, NetConfig};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "dispatch-node",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Fire-and-forget remote task ring demo"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every rank as a thread of this process.
    Local {
        #[arg(long, default_value_t = 3)]
        ranks: usize,
    },

    /// Run as one rank of a TCP group.
    Tcp {
        /// This process's rank; indexes into `--peers`.
        #[arg(long)]
        rank: usize,

        /// Listen addresses of every rank, in rank order.
        #[arg(long, value_delimiter = ',', required = true)]
        peers: Vec<SocketAddr>,

        /// Seconds to keep dialling peers that are not up yet.
        #[arg(long, default_value_t = 30)]
        connect_timeout: u64,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Default log level: INFO. Override with RUST_LOG=dispatch_engine=trace etc.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli    = Cli::parse();
    let config = EngineConfig::from_env()?;

    match cli.command {
        Command::Local { ranks } => run_local(ranks, config),
        Command::Tcp { rank, peers, connect_timeout } => {
            let mut net = NetConfig::new(rank, peers);
            net.connect_timeout = Duration::from_secs(connect_timeout);
            run_tcp(net, config)
        }
    }
}

// ── Local mode ────────────────────────────────────────────────────────────────

fn run_local(ranks: usize, config: EngineConfig) -> Result<()> {
    if ranks == 0 {
        return Err(anyhow!("--ranks must be at least 1"));
    }
    info!(ranks, "starting in-process group");

    thread::scope(|s| -> Result<()> {
        let handles: Vec<_> = LocalFabric::bootstrap(ranks)
            .into_iter()
            .enumerate()
            .map(|(rank, transport)| {
                let config = config.clone();
                thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(s, move || demo::run(transport, config))
            })
            .collect::<std::io::Result<_>>()?;

        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow!("rank thread panicked"))??;
        }
        Ok(())
    })
}

// ── TCP mode ──────────────────────────────────────────────────────────────────

fn run_tcp(net: NetConfig, config: EngineConfig) -> Result<()> {
    info!(rank = net.rank, size = net.peers.len(), "connecting to group");
    let transport = TcpTransport::connect(net).context("failed to join TCP group")?;
    demo::run(transport, config)
}
