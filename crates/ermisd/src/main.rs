//! ermisd — the Ermis daemon.
//!
//! Single binary that assembles the alias service:
//! - Alias database (redb)
//! - DNS, vault and mail gateways
//! - Alias orchestrator
//! - REST API
//!
//! # Usage
//!
//! ```text
//! ermisd standalone --config /etc/ermis/ermis.toml --port 8080
//! ```

mod standalone;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ermis_core::config::ErmisConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ermisd", about = "Ermis alias management daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run with in-memory DNS, vault and mail gateways.
    Standalone {
        /// Configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the alias database (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
        } => {
            let mut config = match config {
                Some(path) => ErmisConfig::from_file(&path)?,
                None => ErmisConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            init_tracing(&config);
            standalone::run(config).await
        }
    }
}

fn init_tracing(config: &ErmisConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.telemetry.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.telemetry.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
