//! Configuration for Weft nodes.
//!
//! `AppConfig` is the runtime binding (who am I, who exists) built once per
//! node and immutable thereafter. `FabricConfig` is the on-disk daemon
//! config; path resolution: explicit argument, then $WEFT_CONFIG.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::registry::{NodeEntry, NodeRegistry, RegistryError};
use crate::route::{RouteError, RouterTable};

/// Per-node runtime binding.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub node_id: String,
    pub nodes: NodeRegistry,
}

impl AppConfig {
    pub fn new(node_id: impl Into<String>, nodes: NodeRegistry) -> Result<Self, ConfigError> {
        let node_id = node_id.into();
        if !nodes.contains(&node_id) {
            return Err(ConfigError::UnknownSelf(node_id));
        }
        Ok(Self { node_id, nodes })
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("own node id {0:?} is not in the node registry")]
    UnknownSelf(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),

    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),

    #[error("no config path given and WEFT_CONFIG is unset")]
    NoPath,
}

// ── Loading ──────────────────────────────────────────────────────────────────

/// On-disk daemon configuration.
///
/// ```toml
/// node_id = "rs_01"
///
/// [[nodes]]
/// id      = "rs_01"
/// tag     = "RS"
/// address = "127.0.0.1:50051"
///
/// [[nodes]]
/// id      = "rc_01"
/// tag     = "RC01"
/// address = "127.0.0.1:50061"
///
/// [router_table.rs_01]
/// adjacent = []
/// served   = ["rc_01"]
/// ```
///
/// The routing table is validated while parsing, so a disconnected or
/// otherwise inconsistent topology fails at load, not at first send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    pub node_id: String,
    pub nodes: Vec<NodeEntry>,
    pub router_table: RouterTable,
}

impl FabricConfig {
    /// Load from an explicit path, falling back to $WEFT_CONFIG.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var("WEFT_CONFIG")
                .map(PathBuf::from)
                .map_err(|_| ConfigError::NoPath)?,
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
        Self::parse(&text, &path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Validate into the runtime binding for this node.
    pub fn app_config(&self) -> Result<AppConfig, ConfigError> {
        let nodes = NodeRegistry::new(self.nodes.clone())?;
        AppConfig::new(self.node_id.clone(), nodes)
    }
}
