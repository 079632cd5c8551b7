//! Entry point that wires `xzmcp-core` into a running aggregating-proxy
//! process: load config, bring every downstream service and upstream
//! endpoint up, then block until a shutdown signal arrives.

use clap::Parser;
use std::sync::Arc;
use xzmcp_core::{Runtime, RuntimeConfig};

#[derive(Parser)]
#[command(name = "xzmcp-server")]
#[command(about = "MCP aggregating proxy: unifies N downstream tool servers behind N upstream endpoints")]
#[command(version)]
struct Cli {
    /// Path to xiaozhi.config.json. Defaults to $XIAOZHI_CONFIG_DIR (or CWD) / xiaozhi.config.json.
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", log_level);
    }
    tracing_subscriber::fmt::init();

    let config = RuntimeConfig::load(cli.config.as_deref()).await?;
    tracing::info!(
        endpoints = ?config.mcp_endpoint.as_vec(),
        services = config.mcp_servers.len(),
        "loaded xzmcp configuration"
    );

    let runtime = Arc::new(Runtime::new(config));
    runtime.start().await;
    tracing::info!("xzmcp-server is up");

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining connections");
    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
