use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;

use mcpilot::config::{find_config_path, load_gateway_config};
use mcpilot::{init_tracing, Gateway};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcpilot")]
#[command(
    version,
    about = "MCPilot: federation gateway for MCP servers and REST APIs"
)]
struct Args {
    /// Path to the gateway config file (YAML). Discovered when omitted.
    #[arg(short = 'c', long = "config", env = "MCPILOT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let path = match args.config {
        Some(path) => path,
        None => find_config_path().context("no config path given and none discovered")?,
    };
    let config = load_gateway_config(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    init_tracing(&config.logging);
    tracing::info!(config = %path.display(), "loaded configuration");

    let gateway = Gateway::new(config);
    gateway.initialize().await;

    for (name, status) in gateway.get_server_status() {
        match &status.last_error {
            Some(error) => tracing::warn!(server = %name, status = %status.status, error = %error, "backend status"),
            None => tracing::info!(server = %name, status = %status.status, "backend status"),
        }
    }
    let metrics = gateway.get_metrics();
    tracing::info!(
        servers_connected = metrics.servers_connected,
        servers_total = metrics.servers_total,
        wrappers_total = metrics.wrappers_total,
        tools = gateway.list_tools(None).await.len(),
        "gateway ready, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    gateway.shutdown().await;
    Ok(())
}
