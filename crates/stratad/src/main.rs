//! stratad — the Strata control plane daemon.
//!
//! Single binary that assembles the control plane:
//! - System database (redb)
//! - Local engine handles and the join loop
//! - Pool manager, stale-record sweeper and evict batcher
//! - SMD query and management
//! - Admin REST API
//!
//! # Usage
//!
//! ```text
//! stratad init --data-dir /var/lib/strata --targets 16 > /etc/strata/strata.toml
//! stratad run --config /etc/strata/strata.toml
//! ```

mod control_plane;
mod engines;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use strata_core::StrataConfig;
use tracing::info;

#[derive(Parser)]
#[command(name = "stratad", about = "Strata control plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Run {
        /// Path to strata.toml.
        #[arg(long, short, default_value = "/etc/strata/strata.toml")]
        config: PathBuf,

        /// Override the API port from the config file.
        #[arg(long)]
        port: Option<u16>,

        /// Override the data directory from the config file.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Address this host is reachable at, recorded with each member.
        #[arg(long, default_value = "127.0.0.1")]
        address: String,
    },

    /// Print a single-engine starter config.
    Init {
        /// Data directory for persistent state and engine sockets.
        #[arg(long, default_value = "/var/lib/strata")]
        data_dir: PathBuf,

        /// Targets served by the engine.
        #[arg(long, default_value = "8")]
        targets: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stratad=debug,strata_pool=debug,strata_dispatch=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            address,
        } => {
            let mut cfg = StrataConfig::from_file(&config)?;
            if let Some(port) = port {
                cfg.api_port = port;
            }
            if let Some(dir) = data_dir {
                cfg.data_dir = dir;
            }
            info!(path = ?config, "configuration loaded");
            control_plane::run_control_plane(cfg, address).await
        }
        Command::Init { data_dir, targets } => {
            let cfg = StrataConfig::scaffold(&data_dir, targets);
            cfg.validate()?;
            print!("{}", cfg.to_toml_string()?);
            Ok(())
        }
    }
}
