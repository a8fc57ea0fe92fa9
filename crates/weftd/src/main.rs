//! weftd — Weft router (RS) daemon.
//!
//! Usage: weftd [config.toml] [node_id]
//!
//! The config path falls back to $WEFT_CONFIG. One binary serves every
//! router id in the table; the optional second argument picks which one
//! this process is, so a deployment script can launch the whole fabric
//! from a single config file.

use std::path::PathBuf;

use anyhow::{Context, Result};

use weft_core::{AppConfig, FabricConfig, NodeRegistry};
use weft_router::{Router, RouterConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = FabricConfig::load(path.as_deref()).context("failed to load fabric config")?;

    let node_id = std::env::args()
        .nth(2)
        .unwrap_or_else(|| config.node_id.clone());
    tracing::info!(node = %node_id, "weftd starting");

    let nodes = NodeRegistry::new(config.nodes.clone()).context("invalid node registry")?;
    let app = AppConfig::new(node_id, nodes).context("invalid node binding")?;

    let router = Router::spawn(RouterConfig {
        app,
        table: config.router_table,
    })
    .await
    .context("failed to start router")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    tracing::info!("shutting down");
    router.shutdown().await;
    Ok(())
}
