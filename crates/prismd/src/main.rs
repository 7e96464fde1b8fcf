//! # prismd
//!
//! Bridge daemon binary — loads config, initializes logging, and runs the
//! relay server until a shutdown signal arrives.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use prism_bridge::{BridgeConfig, BridgeServer};

/// Prism command relay bridge.
#[derive(Parser, Debug)]
#[command(name = "prismd", about = "Prism command relay bridge")]
struct Cli {
    /// Host to bind (overrides config file and env).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign; overrides config file and env).
    #[arg(long)]
    port: Option<u16>,

    /// Per-request response timeout in seconds.
    #[arg(long)]
    response_timeout: Option<u64>,

    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Defaults ← config file ← PRISM_* env ← CLI flags.
    let mut config = BridgeConfig::load(args.config.as_deref())
        .context("Failed to load bridge config")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(secs) = args.response_timeout {
        config.response_timeout_secs = secs;
    }

    let server = BridgeServer::new(config);
    let (addr, handle) = server.listen().await.context("Failed to bind bridge")?;
    tracing::info!("prism bridge listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down...");
    server.shutdown().shutdown();
    let _ = handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}
