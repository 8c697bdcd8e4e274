use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Switchyard LLM gateway
#[derive(Debug, Parser)]
#[command(
    name = "switchyard",
    about = "OpenAI-compatible LLM gateway with circuit breaking, caching and failover"
)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "switchyard.toml", env = "SWITCHYARD_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "SWITCHYARD_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Override the configured log filter (`RUST_LOG` still wins)
    #[arg(long, env = "SWITCHYARD_LOG")]
    pub log: Option<String>,
}
