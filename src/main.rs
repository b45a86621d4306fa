use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use abcfe_node::config::Config;
use abcfe_node::node::Node;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path: PathBuf = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ABCFE_CONFIG").ok())
        .unwrap_or_else(|| "config.toml".to_string())
        .into();
    let config = Config::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;

    let node = Node::new(config).context("initialize node")?;
    node.start().await?;

    wait_for_shutdown().await;
    node.stop();
    // Let loops observe the stop channel and release their resources.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("node stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = sigterm.recv() => info!("termination signal received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
