//! mcbridge entry point.

mod app;
mod config;
mod handler;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// RPC bridge for object-storage transfers with temporary credentials.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Port the RPC server listens on.
    port: u16,

    /// Configuration file (defaults to the per-user config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind, overriding the configuration.
    #[arg(long)]
    bind: Option<std::net::IpAddr>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mcbridge=debug")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting mcbridge");

    let mut config = config::BridgeConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    tracing::info!(backend = ?config.backend, region = %config.region, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, args.port))?;

    tracing::info!("mcbridge shut down cleanly");
    Ok(())
}
